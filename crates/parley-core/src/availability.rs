//! Model availability signal and the gate that picks which view to show.

use std::fmt;

/// Readiness of the language-model service, as reported by the service itself.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Availability {
    Available,
    Unavailable(UnavailableReason),
    /// The model is downloading or being prepared.
    #[default]
    Unready,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnavailableReason {
    DeviceNotEligible,
    FeatureNotEnabled,
    Other(String),
}

impl Availability {
    /// Short label for logs and status lines
    pub fn as_str(&self) -> &'static str {
        match self {
            Availability::Available => "available",
            Availability::Unavailable(UnavailableReason::DeviceNotEligible) => "device-not-eligible",
            Availability::Unavailable(UnavailableReason::FeatureNotEnabled) => "feature-not-enabled",
            Availability::Unavailable(UnavailableReason::Other(_)) => "unavailable",
            Availability::Unready => "unready",
        }
    }
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnavailableReason::DeviceNotEligible => write!(f, "device not eligible"),
            UnavailableReason::FeatureNotEnabled => write!(f, "assistant not enabled"),
            UnavailableReason::Other(description) => write!(f, "{}", description),
        }
    }
}

/// A static informational panel shown instead of the chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub icon: &'static str,
    pub title: &'static str,
    pub message: String,
}

/// What the front end should render for a given signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateView {
    /// Mount the chat session view
    Chat,
    Notice(Notice),
    /// Transient "preparing" indicator
    Preparing,
}

/// Select the view for `signal`.
///
/// Pure and total: the same signal always yields an equal view and nothing is
/// remembered between calls.
pub fn gate(signal: &Availability) -> GateView {
    match signal {
        Availability::Available => GateView::Chat,
        Availability::Unavailable(UnavailableReason::DeviceNotEligible) => GateView::Notice(Notice {
            icon: "⊘",
            title: "Device Not Eligible",
            message: "This device doesn't support the language model.".to_string(),
        }),
        Availability::Unavailable(UnavailableReason::FeatureNotEnabled) => GateView::Notice(Notice {
            icon: "◌",
            title: "Assistant Not Enabled",
            message: "Please set \"enabled\": true in the parley config file to use this feature."
                .to_string(),
        }),
        Availability::Unready => GateView::Preparing,
        Availability::Unavailable(UnavailableReason::Other(description)) => GateView::Notice(Notice {
            icon: "⚠",
            title: "Unavailable",
            message: format!("The model is unavailable: {}", description),
        }),
    }
}
