//! Lifecycle callbacks, modeled as a record of function values rather than a
//! trait hierarchy.

use crate::options::TunnelInfo;

type Callback<T> = Box<dyn Fn(T) + Send + Sync>;

/// All callbacks are optional and invoked from engine-owned task contexts.
/// They must not block indefinitely: offload blocking work yourself (e.g.
/// via `tokio::task::spawn_blocking`) if a handler needs to do any.
#[derive(Default)]
pub struct Events {
    pub on_connect: Option<Callback<TunnelInfo>>,
    pub on_disconnect: Option<Callback<String>>,
    pub on_error: Option<Callback<String>>,
    pub on_reconnect: Option<Callback<u32>>,
    pub on_status: Option<Callback<&'static str>>,
}

impl Events {
    pub fn builder() -> EventsBuilder {
        EventsBuilder::default()
    }

    pub(crate) fn fire_connect(&self, info: TunnelInfo) {
        if let Some(cb) = &self.on_connect {
            cb(info);
        }
    }

    pub(crate) fn fire_disconnect(&self, reason: impl Into<String>) {
        if let Some(cb) = &self.on_disconnect {
            cb(reason.into());
        }
    }

    pub(crate) fn fire_error(&self, error: impl Into<String>) {
        if let Some(cb) = &self.on_error {
            cb(error.into());
        }
    }

    pub(crate) fn fire_reconnect(&self, attempt: u32) {
        if let Some(cb) = &self.on_reconnect {
            cb(attempt);
        }
    }

    pub(crate) fn fire_status(&self, status: &'static str) {
        if let Some(cb) = &self.on_status {
            cb(status);
        }
    }
}

#[derive(Default)]
pub struct EventsBuilder {
    events: Events,
}

impl EventsBuilder {
    pub fn on_connect(mut self, f: impl Fn(TunnelInfo) + Send + Sync + 'static) -> Self {
        self.events.on_connect = Some(Box::new(f));
        self
    }

    pub fn on_disconnect(mut self, f: impl Fn(String) + Send + Sync + 'static) -> Self {
        self.events.on_disconnect = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(String) + Send + Sync + 'static) -> Self {
        self.events.on_error = Some(Box::new(f));
        self
    }

    pub fn on_reconnect(mut self, f: impl Fn(u32) + Send + Sync + 'static) -> Self {
        self.events.on_reconnect = Some(Box::new(f));
        self
    }

    pub fn on_status(mut self, f: impl Fn(&'static str) + Send + Sync + 'static) -> Self {
        self.events.on_status = Some(Box::new(f));
        self
    }

    pub fn build(self) -> Events {
        self.events
    }
}
