//! Network Signal
//!
//! Host-updated network conditions backed by atomics so the scheduler can
//! poll them every tick without locking.

use crate::domain::ports::{ConnectionClass, NetworkConditions, NetworkMonitor};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use tracing::info;

/// Network monitor whose conditions are pushed by the host
#[derive(Debug)]
pub struct StaticNetworkMonitor {
    is_online: AtomicBool,
    is_data_saver_mode: AtomicBool,
    connection_class: AtomicU8,
}

impl Default for StaticNetworkMonitor {
    fn default() -> Self {
        Self::new(NetworkConditions::default())
    }
}

impl StaticNetworkMonitor {
    /// Create a monitor reporting `initial`
    pub fn new(initial: NetworkConditions) -> Self {
        Self {
            is_online: AtomicBool::new(initial.is_online),
            is_data_saver_mode: AtomicBool::new(initial.is_data_saver_mode),
            connection_class: AtomicU8::new(encode_class(initial.connection_class)),
        }
    }

    /// Replace every signal at once
    pub fn update(&self, conditions: NetworkConditions) {
        let previous = self.conditions();
        self.is_online.store(conditions.is_online, Ordering::Release);
        self.is_data_saver_mode
            .store(conditions.is_data_saver_mode, Ordering::Release);
        self.connection_class
            .store(encode_class(conditions.connection_class), Ordering::Release);

        if previous.allows_background_work() != conditions.allows_background_work() {
            info!(
                online = conditions.is_online,
                data_saver = conditions.is_data_saver_mode,
                class = %conditions.connection_class,
                background_work = conditions.allows_background_work(),
                "Network conditions changed"
            );
        }
    }

    pub fn set_online(&self, online: bool) {
        self.update(NetworkConditions {
            is_online: online,
            ..self.conditions()
        });
    }

    pub fn set_data_saver_mode(&self, enabled: bool) {
        self.update(NetworkConditions {
            is_data_saver_mode: enabled,
            ..self.conditions()
        });
    }

    pub fn set_connection_class(&self, class: ConnectionClass) {
        self.update(NetworkConditions {
            connection_class: class,
            ..self.conditions()
        });
    }
}

impl NetworkMonitor for StaticNetworkMonitor {
    fn conditions(&self) -> NetworkConditions {
        NetworkConditions {
            is_online: self.is_online.load(Ordering::Acquire),
            is_data_saver_mode: self.is_data_saver_mode.load(Ordering::Acquire),
            connection_class: decode_class(self.connection_class.load(Ordering::Acquire)),
        }
    }
}

fn encode_class(class: ConnectionClass) -> u8 {
    match class {
        ConnectionClass::Slow => 0,
        ConnectionClass::Medium => 1,
        ConnectionClass::Fast => 2,
    }
}

fn decode_class(raw: u8) -> ConnectionClass {
    match raw {
        0 => ConnectionClass::Slow,
        1 => ConnectionClass::Medium,
        _ => ConnectionClass::Fast,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_updates_visible() {
        let monitor = StaticNetworkMonitor::default();
        assert!(monitor.conditions().allows_background_work());

        monitor.set_connection_class(ConnectionClass::Slow);
        assert_eq!(monitor.conditions().connection_class, ConnectionClass::Slow);
        assert!(!monitor.conditions().allows_background_work());

        monitor.set_connection_class(ConnectionClass::Medium);
        monitor.set_data_saver_mode(true);
        assert!(!monitor.conditions().allows_background_work());

        monitor.update(NetworkConditions::default());
        monitor.set_online(false);
        let conditions = monitor.conditions();
        assert!(!conditions.is_online);
        assert!(!conditions.is_data_saver_mode);
    }
}
