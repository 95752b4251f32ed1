//! Mutable per-service runtime state

use std::fmt;
use std::sync::Arc;

/// Resolved enablement. `Unknown` until the resolver (or a setter) decides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Enablement {
    #[default]
    Unknown,
    Enabled,
    Disabled,
}

impl Enablement {
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Enablement::Unknown => None,
            Enablement::Enabled => Some(true),
            Enablement::Disabled => Some(false),
        }
    }
}

impl From<bool> for Enablement {
    fn from(enabled: bool) -> Self {
        if enabled {
            Enablement::Enabled
        } else {
            Enablement::Disabled
        }
    }
}

/// State field that changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateField {
    Enabled,
    Started,
    Healthy,
    Ready,
}

impl fmt::Display for StateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateField::Enabled => write!(f, "enabled"),
            StateField::Started => write!(f, "started"),
            StateField::Healthy => write!(f, "healthy"),
            StateField::Ready => write!(f, "ready"),
        }
    }
}

/// Change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub service: String,
    pub field: StateField,
    pub value: bool,
}

/// State listener
pub type StateListener = Arc<dyn Fn(&StateChange) + Send + Sync>;

/// Runtime state of one service.
///
/// Setters notify listeners only when the value actually changes.
#[derive(Clone)]
pub struct ServiceState {
    service: String,
    enabled: Enablement,
    started: bool,
    healthy: bool,
    ready: bool,
    listeners: Vec<StateListener>,
}

impl ServiceState {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            enabled: Enablement::Unknown,
            started: false,
            healthy: false,
            ready: false,
            listeners: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, listener: StateListener) {
        self.listeners.push(listener);
    }

    pub fn enabled(&self) -> Enablement {
        self.enabled
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        let next = Enablement::from(enabled);
        if self.enabled != next {
            self.enabled = next;
            self.notify(StateField::Enabled, enabled);
        }
    }

    pub fn set_started(&mut self, started: bool) {
        if self.started != started {
            self.started = started;
            self.notify(StateField::Started, started);
        }
    }

    pub fn set_healthy(&mut self, healthy: bool) {
        if self.healthy != healthy {
            self.healthy = healthy;
            self.notify(StateField::Healthy, healthy);
        }
    }

    pub fn set_ready(&mut self, ready: bool) {
        if self.ready != ready {
            self.ready = ready;
            self.notify(StateField::Ready, ready);
        }
    }

    fn notify(&self, field: StateField, value: bool) {
        tracing::debug!("{} {} -> {}", self.service, field, value);
        let change = StateChange {
            service: self.service.clone(),
            field,
            value,
        };
        for listener in &self.listeners {
            listener(&change);
        }
    }
}

impl fmt::Debug for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceState")
            .field("service", &self.service)
            .field("enabled", &self.enabled)
            .field("started", &self.started)
            .field("healthy", &self.healthy)
            .field("ready", &self.ready)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder() -> (StateListener, Arc<Mutex<Vec<StateChange>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener: StateListener = Arc::new(move |change: &StateChange| {
            sink.lock().unwrap().push(change.clone());
        });
        (listener, seen)
    }

    #[test]
    fn test_setters_notify_on_change_only() {
        let (listener, seen) = recorder();
        let mut state = ServiceState::new("db");
        state.subscribe(listener);

        state.set_started(true);
        state.set_started(true);
        state.set_healthy(true);
        state.set_started(false);

        let changes = seen.lock().unwrap();
        assert_eq!(changes.len(), 3);
        assert_eq!(
            changes[0],
            StateChange {
                service: "db".to_string(),
                field: StateField::Started,
                value: true,
            }
        );
        assert_eq!(changes[1].field, StateField::Healthy);
        assert!(!changes[2].value);
    }

    #[test]
    fn test_enablement_tristate() {
        let mut state = ServiceState::new("db");
        assert_eq!(state.enabled(), Enablement::Unknown);
        assert_eq!(state.enabled().as_bool(), None);

        state.set_enabled(false);
        assert_eq!(state.enabled().as_bool(), Some(false));
    }
}
