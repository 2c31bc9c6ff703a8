use shared::{HandResult, Landmark, Point, Snapshot};

use super::gesture::{classify_gesture, INDEX_TIP};
use super::replay::RawFrame;
use super::{CaptureError, LandmarkExtractor};

pub const POSE_LANDMARK_COUNT: usize = 33;

/// MediaPipe pose model index of each landmark the rules care about.
fn pose_index(landmark: Landmark) -> usize {
    match landmark {
        Landmark::Nose => 0,
        Landmark::LeftShoulder => 11,
        Landmark::RightShoulder => 12,
        Landmark::LeftWrist => 15,
        Landmark::RightWrist => 16,
        Landmark::LeftIndex => 19,
        Landmark::RightIndex => 20,
    }
}

/// Picks the named keypoints out of a full pose landmark list.
#[derive(Debug, Default, Clone, Copy)]
pub struct PoseExtractor;

impl PoseExtractor {
    pub fn snapshot(landmarks: &[Point], timestamp: f64) -> Result<Snapshot, CaptureError> {
        if landmarks.len() < POSE_LANDMARK_COUNT {
            return Err(CaptureError::Extract(format!(
                "expected {} pose landmarks, got {}",
                POSE_LANDMARK_COUNT,
                landmarks.len()
            )));
        }

        let snapshot = Landmark::ALL
            .iter()
            .fold(Snapshot::new(timestamp), |snapshot, landmark| {
                snapshot.with(*landmark, landmarks[pose_index(*landmark)])
            });
        Ok(snapshot)
    }
}

impl LandmarkExtractor<RawFrame> for PoseExtractor {
    type Output = Snapshot;

    fn extract(
        &mut self,
        frame: &RawFrame,
        timestamp: f64,
    ) -> Result<Option<Snapshot>, CaptureError> {
        match &frame.pose {
            Some(landmarks) => Self::snapshot(landmarks, timestamp).map(Some),
            None => Ok(None),
        }
    }
}

/// Classifies every detected hand. Always publishes, so "no hands in view"
/// replaces a stale list.
#[derive(Debug, Default, Clone, Copy)]
pub struct HandExtractor;

impl HandExtractor {
    pub fn hands(frame: &RawFrame) -> Result<Vec<HandResult>, CaptureError> {
        frame
            .hands
            .iter()
            .map(|hand| {
                let gesture = classify_gesture(&hand.landmarks).ok_or_else(|| {
                    CaptureError::Extract(format!(
                        "{:?} hand has {} landmarks",
                        hand.label,
                        hand.landmarks.len()
                    ))
                })?;
                Ok(HandResult {
                    hand: hand.label,
                    gesture,
                    confidence: hand.score,
                    index_tip: hand.landmarks[INDEX_TIP],
                })
            })
            .collect()
    }
}

impl LandmarkExtractor<RawFrame> for HandExtractor {
    type Output = Vec<HandResult>;

    fn extract(
        &mut self,
        frame: &RawFrame,
        _timestamp: f64,
    ) -> Result<Option<Vec<HandResult>>, CaptureError> {
        Self::hands(frame).map(Some)
    }
}
