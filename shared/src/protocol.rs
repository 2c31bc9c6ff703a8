use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Normalized 2-D coordinate, serialized as `[x, y]`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct Point(pub f64, pub f64);

impl Point {
    pub fn x(self) -> f64 {
        self.0
    }

    pub fn y(self) -> f64 {
        self.1
    }

    pub fn distance(self, other: Point) -> f64 {
        let dx = self.0 - other.0;
        let dy = self.1 - other.1;
        (dx * dx + dy * dy).sqrt()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Landmark {
    Nose,
    LeftShoulder,
    RightShoulder,
    LeftWrist,
    RightWrist,
    LeftIndex,
    RightIndex,
}

impl Landmark {
    pub const ALL: [Landmark; 7] = [
        Landmark::Nose,
        Landmark::LeftShoulder,
        Landmark::RightShoulder,
        Landmark::LeftWrist,
        Landmark::RightWrist,
        Landmark::LeftIndex,
        Landmark::RightIndex,
    ];
}

/// One timestamped set of pose keypoints.
///
/// `timestamp` is monotonic seconds since the daemon started. Landmarks are
/// flattened next to it on the wire, e.g. `{"timestamp":1.5,"nose":[0.5,0.2]}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    pub timestamp: f64,
    #[serde(flatten)]
    pub landmarks: BTreeMap<Landmark, Point>,
}

impl Snapshot {
    pub fn new(timestamp: f64) -> Self {
        Self {
            timestamp,
            landmarks: BTreeMap::new(),
        }
    }

    pub fn with(mut self, landmark: Landmark, point: Point) -> Self {
        self.landmarks.insert(landmark, point);
        self
    }

    pub fn get(&self, landmark: Landmark) -> Option<Point> {
        self.landmarks.get(&landmark).copied()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandLabel {
    Left,
    Right,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Gesture {
    Fist,
    Pointing,
    OpenPalm,
    Bunny,
    Partial,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HandResult {
    pub hand: HandLabel,
    pub gesture: Gesture,
    pub confidence: f64,
    pub index_tip: Point,
}

/// A semantic command derived from consecutive pose samples.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "command", content = "params", rename_all = "snake_case")]
pub enum Command {
    Burst {
        x: f64,
        y: f64,
        intensity: f64,
    },
    AuraBoost {
        active: bool,
    },
    GenerateTexture {
        prompt: String,
        #[serde(rename = "type")]
        kind: String,
    },
}

/// Everything the daemon pushes to connected clients.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Update {
        pose: Snapshot,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hands: Option<Vec<HandResult>>,
        commands: Vec<Command>,
    },
    TextureReady {
        filename: String,
        prefix: String,
        url: String,
    },
    Status {
        provider: String,
        hands_enabled: bool,
        clients: usize,
    },
}

impl ServerMessage {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
