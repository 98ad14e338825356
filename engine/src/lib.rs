pub mod cloud;
pub mod duration;
pub mod history;
pub mod rules;
pub mod tick;
pub mod watchlist;

pub use cloud::{CloudConfig, CloudEngine, CloudPulse, CloudSnapshot, Direction};
pub use rules::{Alert, AlertType, RuleConfig, RuleEngine};
pub use tick::Tick;
pub use watchlist::{RuleDefaults, Watchlist};
