// Gremlin Virtual Button Synthesizer
// Turns axis and hat samples into idempotent press/release edges

use serde::{Deserialize, Serialize};

use crate::device::{EventValue, HatDirection};

/// When a non-button input counts as "pressed"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ActivationPolicy {
    /// Button samples as they are; axes and hats never press
    Button,
    /// Axis strictly above the threshold
    AxisAbove { threshold: f64 },
    /// Axis strictly below the threshold
    AxisBelow { threshold: f64 },
    /// Axis within [low, high]
    AxisRange { low: f64, high: f64 },
    /// Hat in any non-center position
    AnyHat,
    /// Hat in exactly one of the listed positions
    HatDirections { directions: Vec<HatDirection> },
}

impl ActivationPolicy {
    /// Pressed state for a sample; buttons pass through unchanged.
    ///
    /// Returns `None` when the sample kind does not fit the policy.
    pub fn is_pressed(&self, value: &EventValue) -> Option<bool> {
        match (self, value) {
            (_, EventValue::Button(b)) => Some(*b),
            (ActivationPolicy::AxisAbove { threshold }, EventValue::Axis(v)) => Some(*v > *threshold),
            (ActivationPolicy::AxisBelow { threshold }, EventValue::Axis(v)) => Some(*v < *threshold),
            (ActivationPolicy::AxisRange { low, high }, EventValue::Axis(v)) => Some(*v >= *low && *v <= *high),
            (ActivationPolicy::AnyHat, EventValue::Hat(d)) => Some(!d.is_centered()),
            (ActivationPolicy::HatDirections { directions }, EventValue::Hat(d)) => Some(directions.contains(d)),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let in_range = |v: f64| v.is_finite() && (-1.0..=1.0).contains(&v);
        match self {
            ActivationPolicy::AxisAbove { threshold } | ActivationPolicy::AxisBelow { threshold } => {
                if !in_range(*threshold) {
                    return Err(format!("threshold {} outside [-1, 1]", threshold));
                }
            }
            ActivationPolicy::AxisRange { low, high } => {
                if !in_range(*low) || !in_range(*high) || low > high {
                    return Err(format!("invalid axis range [{}, {}]", low, high));
                }
            }
            ActivationPolicy::HatDirections { directions } => {
                if directions.iter().any(|d| d.is_centered()) {
                    return Err("center is not a hat activation direction".to_string());
                }
            }
            ActivationPolicy::Button | ActivationPolicy::AnyHat => {}
        }
        Ok(())
    }
}

/// Discrete transition produced by the synthesizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Pressed,
    Released,
}

impl Edge {
    pub fn value(self) -> EventValue {
        EventValue::Button(self == Edge::Pressed)
    }
}

/// Pressed state of one synthesized button
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VirtualButton {
    pressed: bool,
}

impl VirtualButton {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pressed(&self) -> bool {
        self.pressed
    }

    /// Feed one sample; emits an edge only when the pressed state flips
    pub fn update(&mut self, policy: &ActivationPolicy, value: &EventValue) -> Option<Edge> {
        let now_pressed = policy.is_pressed(value)?;
        if now_pressed == self.pressed {
            return None;
        }
        self.pressed = now_pressed;
        Some(if now_pressed { Edge::Pressed } else { Edge::Released })
    }

    pub fn reset(&mut self) {
        self.pressed = false;
    }
}
