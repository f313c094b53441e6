use std::sync::Arc;
use std::time::Duration;

use mavio::protocol::{ComponentId, SystemId};

use crate::consts::{
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_COMMAND_RETRIES, DEFAULT_COMPONENT_ID,
    DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_HEARTBEAT_TIMEOUT, DEFAULT_PARAM_RETRIES,
    DEFAULT_SYSTEM_ID, DEFAULT_TIMEOUT, DEFAULT_TRANSFER_RETRIES,
};
use crate::core::time::{Clock, SystemClock};

/// Configuration of a [`Hub`](crate::system::Hub) and of every system it discovers.
///
/// ```rust
/// use std::time::Duration;
/// use mavlane::system::HubConf;
///
/// let conf = HubConf::builder()
///     .system_id(200)
///     .timeout(Duration::from_millis(250))
///     .transfer_retries(8)
///     .build();
///
/// assert_eq!(conf.system_id(), 200);
/// assert_eq!(conf.transfer_retries(), 8);
/// ```
#[derive(Clone, Debug)]
pub struct HubConf {
    system_id: SystemId,
    component_id: ComponentId,
    timeout: Duration,
    command_retries: usize,
    param_retries: usize,
    transfer_retries: usize,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    channel_capacity: u8,
    clock: Arc<dyn Clock>,
}

/// Builder for [`HubConf`].
#[derive(Clone, Debug)]
pub struct HubConfBuilder {
    conf: HubConf,
}

impl HubConf {
    /// Starts building a configuration from defaults.
    pub fn builder() -> HubConfBuilder {
        HubConfBuilder {
            conf: HubConf::default(),
        }
    }

    /// Our own system `ID`.
    pub fn system_id(&self) -> SystemId {
        self.system_id
    }

    /// Our own component `ID`.
    pub fn component_id(&self) -> ComponentId {
        self.component_id
    }

    /// Timeout of a single request attempt.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send attempts of a command.
    pub fn command_retries(&self) -> usize {
        self.command_retries
    }

    /// Send attempts of a parameter request.
    pub fn param_retries(&self) -> usize {
        self.param_retries
    }

    /// Retry budget shared by mission transfers.
    pub fn transfer_retries(&self) -> usize {
        self.transfer_retries
    }

    /// How often our heartbeat is sent.
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Silence after which a remote is considered disconnected.
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_timeout
    }

    /// Capacity of the parser channel pool.
    pub fn channel_capacity(&self) -> u8 {
        self.channel_capacity
    }

    /// Time source.
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }
}

impl Default for HubConf {
    fn default() -> Self {
        Self {
            system_id: DEFAULT_SYSTEM_ID,
            component_id: DEFAULT_COMPONENT_ID,
            timeout: DEFAULT_TIMEOUT,
            command_retries: DEFAULT_COMMAND_RETRIES,
            param_retries: DEFAULT_PARAM_RETRIES,
            transfer_retries: DEFAULT_TRANSFER_RETRIES,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            clock: Arc::new(SystemClock),
        }
    }
}

impl HubConfBuilder {
    /// Sets our own system `ID`.
    pub fn system_id(mut self, system_id: SystemId) -> Self {
        self.conf.system_id = system_id;
        self
    }

    /// Sets our own component `ID`.
    pub fn component_id(mut self, component_id: ComponentId) -> Self {
        self.conf.component_id = component_id;
        self
    }

    /// Sets the timeout of a single request attempt.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.conf.timeout = timeout;
        self
    }

    /// Sets the number of send attempts of a command, at least one.
    pub fn command_retries(mut self, retries: usize) -> Self {
        self.conf.command_retries = retries.max(1);
        self
    }

    /// Sets the number of send attempts of a parameter request, at least one.
    pub fn param_retries(mut self, retries: usize) -> Self {
        self.conf.param_retries = retries.max(1);
        self
    }

    /// Sets the retry budget of mission transfers.
    pub fn transfer_retries(mut self, retries: usize) -> Self {
        self.conf.transfer_retries = retries;
        self
    }

    /// Sets how often our heartbeat is sent.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.conf.heartbeat_interval = interval;
        self
    }

    /// Sets the silence after which a remote is considered disconnected.
    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.conf.heartbeat_timeout = timeout;
        self
    }

    /// Sets the capacity of the parser channel pool.
    pub fn channel_capacity(mut self, capacity: u8) -> Self {
        self.conf.channel_capacity = capacity;
        self
    }

    /// Sets the time source.
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.conf.clock = Arc::new(clock);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> HubConf {
        self.conf
    }
}
