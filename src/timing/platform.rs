//! Execution platform detection for pre-roll heuristics

use serde::{Deserialize, Serialize};

/// Coarse platform class. Mobile targets get extra pre-roll for their higher
/// output latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Desktop,
    Mobile,
}

impl Platform {
    pub fn current() -> Self {
        cfg_if::cfg_if! {
            if #[cfg(any(target_os = "android", target_os = "ios"))] {
                Platform::Mobile
            } else {
                Platform::Desktop
            }
        }
    }

    pub fn is_mobile(self) -> bool {
        self == Platform::Mobile
    }
}
