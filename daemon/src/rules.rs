use shared::{Command, Landmark, Snapshot};
use tracing::{debug, info};

use crate::config::RulesConfig;

/// Turns consecutive pose snapshots into commands.
///
/// Holds only the previous snapshot and the time of the last
/// `generate_texture`. All times come from the snapshots themselves.
pub struct RuleEngine {
    config: RulesConfig,
    previous: Option<Snapshot>,
    last_trigger: Option<f64>,
}

impl RuleEngine {
    pub fn new(config: RulesConfig) -> Self {
        info!(
            "RuleEngine initialized: velocity_threshold={}, hand_distance_threshold={}, cooldown={}s",
            config.velocity_threshold, config.hand_distance_threshold, config.cooldown_seconds
        );
        Self {
            config,
            previous: None,
            last_trigger: None,
        }
    }

    /// Commands for `sample`, in order: burst, aura_boost, generate_texture.
    /// The first sample only seeds state.
    pub fn process(&mut self, sample: &Snapshot) -> Vec<Command> {
        let Some(previous) = self.previous.replace(sample.clone()) else {
            debug!("First sample at t={:.3}, seeding state", sample.timestamp);
            return Vec::new();
        };

        let mut commands = Vec::with_capacity(3);

        if let Some(burst) = self.burst(&previous, sample) {
            commands.push(burst);
        }

        commands.push(Command::AuraBoost {
            active: Self::hands_above_head(sample),
        });

        if let Some(generate) = self.generate_texture(sample) {
            commands.push(generate);
        }

        commands
    }

    fn burst(&self, previous: &Snapshot, sample: &Snapshot) -> Option<Command> {
        let current = sample.get(Landmark::RightIndex)?;
        let before = previous.get(Landmark::RightIndex)?;

        let dt = sample.timestamp - previous.timestamp;
        if dt <= 0.0 {
            debug!("Non-increasing timestamps (dt={:.4}), skipping velocity", dt);
            return None;
        }

        let velocity = current.distance(before) / dt;
        if velocity > self.config.velocity_threshold {
            debug!("Burst: velocity={:.3}", velocity);
            Some(Command::Burst {
                x: current.x(),
                y: current.y(),
                intensity: velocity.min(self.config.max_intensity),
            })
        } else {
            None
        }
    }

    /// y grows downward, so "above" means a smaller y.
    fn hands_above_head(sample: &Snapshot) -> bool {
        match (
            sample.get(Landmark::RightWrist),
            sample.get(Landmark::LeftWrist),
            sample.get(Landmark::Nose),
        ) {
            (Some(right), Some(left), Some(nose)) => right.y() < nose.y() && left.y() < nose.y(),
            _ => false,
        }
    }

    fn generate_texture(&mut self, sample: &Snapshot) -> Option<Command> {
        let right = sample.get(Landmark::RightWrist)?;
        let left = sample.get(Landmark::LeftWrist)?;

        if right.distance(left) >= self.config.hand_distance_threshold {
            return None;
        }

        let now = sample.timestamp;
        let cooled_down = self
            .last_trigger
            .map_or(true, |last| now - last >= self.config.cooldown_seconds);
        if !cooled_down {
            return None;
        }

        self.last_trigger = Some(now);
        info!("Hands together at t={:.3}, requesting texture", now);
        Some(Command::GenerateTexture {
            prompt: self.config.rune_prompt.clone(),
            kind: self.config.rune_kind.clone(),
        })
    }
}
