//! Hand gesture classification from a 21-point hand landmark set.
//!
//! Indices follow the MediaPipe hand model.

use shared::{Gesture, Point};

pub const HAND_LANDMARK_COUNT: usize = 21;

pub const WRIST: usize = 0;
pub const INDEX_MCP: usize = 5;
pub const INDEX_TIP: usize = 8;
pub const MIDDLE_MCP: usize = 9;
pub const MIDDLE_TIP: usize = 12;
pub const RING_MCP: usize = 13;
pub const RING_TIP: usize = 16;
pub const PINKY_MCP: usize = 17;
pub const PINKY_TIP: usize = 20;

/// A finger counts as extended when its tip is this much further from the
/// wrist than its knuckle.
const EXTENSION_RATIO: f64 = 1.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FingerState {
    pub index: bool,
    pub middle: bool,
    pub ring: bool,
    pub pinky: bool,
}

impl FingerState {
    pub fn extended_count(&self) -> usize {
        [self.index, self.middle, self.ring, self.pinky]
            .iter()
            .filter(|e| **e)
            .count()
    }
}

pub fn finger_extended(tip: Point, mcp: Point, wrist: Point) -> bool {
    tip.distance(wrist) > EXTENSION_RATIO * mcp.distance(wrist)
}

pub fn finger_states(landmarks: &[Point]) -> Option<FingerState> {
    if landmarks.len() < HAND_LANDMARK_COUNT {
        return None;
    }
    let wrist = landmarks[WRIST];
    Some(FingerState {
        index: finger_extended(landmarks[INDEX_TIP], landmarks[INDEX_MCP], wrist),
        middle: finger_extended(landmarks[MIDDLE_TIP], landmarks[MIDDLE_MCP], wrist),
        ring: finger_extended(landmarks[RING_TIP], landmarks[RING_MCP], wrist),
        pinky: finger_extended(landmarks[PINKY_TIP], landmarks[PINKY_MCP], wrist),
    })
}

pub fn classify(fingers: FingerState) -> Gesture {
    match fingers.extended_count() {
        0 => Gesture::Fist,
        2 if fingers.index && fingers.middle => Gesture::Bunny,
        1 if fingers.index => Gesture::Pointing,
        n if n >= 3 => Gesture::OpenPalm,
        _ => Gesture::Partial,
    }
}

/// Returns `None` when the landmark set is incomplete.
pub fn classify_gesture(landmarks: &[Point]) -> Option<Gesture> {
    finger_states(landmarks).map(classify)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hand(fingers: FingerState) -> Vec<Point> {
        let mut points = vec![Point(0.5, 0.5); HAND_LANDMARK_COUNT];
        points[WRIST] = Point(0.5, 0.9);
        let columns = [
            (INDEX_MCP, INDEX_TIP, 0.40, fingers.index),
            (MIDDLE_MCP, MIDDLE_TIP, 0.47, fingers.middle),
            (RING_MCP, RING_TIP, 0.54, fingers.ring),
            (PINKY_MCP, PINKY_TIP, 0.61, fingers.pinky),
        ];
        for (mcp, tip, x, extended) in columns {
            points[mcp] = Point(x, 0.7);
            points[tip] = if extended {
                Point(x, 0.4)
            } else {
                Point(x, 0.75)
            };
        }
        points
    }

    fn fingers(index: bool, middle: bool, ring: bool, pinky: bool) -> FingerState {
        FingerState {
            index,
            middle,
            ring,
            pinky,
        }
    }

    #[test]
    fn test_finger_extended_ratio() {
        let wrist = Point(0.0, 0.0);
        let mcp = Point(0.0, 1.0);
        assert!(finger_extended(Point(0.0, 1.21), mcp, wrist));
        assert!(!finger_extended(Point(0.0, 1.19), mcp, wrist));
        assert!(!finger_extended(Point(0.0, 0.5), mcp, wrist));
    }

    #[test]
    fn test_fist() {
        let landmarks = hand(fingers(false, false, false, false));
        assert_eq!(classify_gesture(&landmarks), Some(Gesture::Fist));
    }

    #[test]
    fn test_bunny() {
        let landmarks = hand(fingers(true, true, false, false));
        assert_eq!(classify_gesture(&landmarks), Some(Gesture::Bunny));
    }

    #[test]
    fn test_pointing() {
        let landmarks = hand(fingers(true, false, false, false));
        assert_eq!(classify_gesture(&landmarks), Some(Gesture::Pointing));
    }

    #[test]
    fn test_open_palm() {
        assert_eq!(
            classify_gesture(&hand(fingers(true, true, true, true))),
            Some(Gesture::OpenPalm)
        );
        assert_eq!(
            classify_gesture(&hand(fingers(false, true, true, true))),
            Some(Gesture::OpenPalm)
        );
    }

    #[test]
    fn test_partial() {
        assert_eq!(
            classify_gesture(&hand(fingers(false, true, false, false))),
            Some(Gesture::Partial)
        );
        assert_eq!(
            classify_gesture(&hand(fingers(false, false, true, true))),
            Some(Gesture::Partial)
        );
        assert_eq!(
            classify_gesture(&hand(fingers(true, false, false, true))),
            Some(Gesture::Partial)
        );
    }

    #[test]
    fn test_decision_table_is_total() {
        for bits in 0u8..16 {
            let state = fingers(bits & 1 != 0, bits & 2 != 0, bits & 4 != 0, bits & 8 != 0);
            let expected = match (state.extended_count(), state.index, state.middle) {
                (0, _, _) => Gesture::Fist,
                (2, true, true) => Gesture::Bunny,
                (1, true, _) => Gesture::Pointing,
                (n, _, _) if n >= 3 => Gesture::OpenPalm,
                _ => Gesture::Partial,
            };
            assert_eq!(classify(state), expected, "fingers {:?}", state);
            assert_eq!(classify_gesture(&hand(state)), Some(expected));
        }
    }

    #[test]
    fn test_incomplete_hand_is_rejected() {
        let landmarks = vec![Point(0.5, 0.5); 10];
        assert_eq!(classify_gesture(&landmarks), None);
    }
}
