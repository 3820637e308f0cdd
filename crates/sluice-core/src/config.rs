//! Configuration surface of spec §6: reactor/proactor engine options plus
//! per-transport socket options, all optional with documented defaults,
//! built with the teacher's `with_*` builder idiom.
use std::time::Duration;

/// Static pins every socket to one engine/thread for the lifetime of the
/// socket; dynamic lets ops migrate between engines, trading the
/// stronger "same thread always" strand guarantee for load spreading.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadBalancingOptions {
    Static,
    Dynamic,
}

impl Default for LoadBalancingOptions {
    fn default() -> Self {
        LoadBalancingOptions::Static
    }
}

/// Shared engine-construction knobs common to both reactor and proactor
/// configurations.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub metric_name: Option<String>,
    pub min_threads: usize,
    pub max_threads: usize,
    pub driver_name: Option<String>,
    pub load_balancing: LoadBalancingOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            metric_name: None,
            min_threads: 1,
            max_threads: 1,
            driver_name: None,
            load_balancing: LoadBalancingOptions::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_metric_name(mut self, name: impl Into<String>) -> Self {
        self.metric_name = Some(name.into());
        self
    }

    pub fn with_thread_range(mut self, min: usize, max: usize) -> Self {
        self.min_threads = min;
        self.max_threads = max.max(min);
        self
    }

    pub fn with_driver_name(mut self, name: impl Into<String>) -> Self {
        self.driver_name = Some(name.into());
        self
    }

    pub fn with_load_balancing(mut self, mode: LoadBalancingOptions) -> Self {
        self.load_balancing = mode;
        self
    }
}

/// Reactor-specific construction options. Presently identical to the
/// shared engine knobs; kept as a distinct type so reactor- and
/// proactor-only options can diverge without a breaking change.
#[derive(Clone, Debug, Default)]
pub struct ReactorConfig {
    pub engine: EngineConfig,
}

/// Proactor-specific construction options.
#[derive(Clone, Debug, Default)]
pub struct ProactorConfig {
    pub engine: EngineConfig,
    /// Worker threads backing the completion-emulation thread pool;
    /// distinct from `engine.{min,max}_threads`, which size the poller
    /// side of the completion queue.
    pub completion_workers: usize,
}

/// Watermark pair shared by read and write queue configuration.
#[derive(Clone, Copy, Debug)]
pub struct WatermarkOptions {
    pub low: usize,
    pub high: usize,
}

impl Default for WatermarkOptions {
    fn default() -> Self {
        Self { low: 64 * 1024, high: 256 * 1024 }
    }
}

/// Options shared by every per-socket transport kind.
#[derive(Clone, Debug)]
pub struct StreamSocketOptions {
    pub reuse_address: bool,
    pub read_queue_watermarks: WatermarkOptions,
    pub write_queue_watermarks: WatermarkOptions,
    pub min_incoming_transfer_size: usize,
    pub max_incoming_transfer_size: usize,
    pub send_greedily: bool,
    pub receive_greedily: bool,
    pub send_buffer_size: Option<usize>,
    pub receive_buffer_size: Option<usize>,
    pub keep_alive: bool,
    pub no_delay: bool,
    pub keep_half_open: bool,
    pub linger: Option<LingerOptions>,
    pub timestamp_outgoing_data: bool,
    pub timestamp_incoming_data: bool,
    pub load_balancing: LoadBalancingOptions,
}

/// `lingerFlag`/`lingerTimeout`: `timeout == Duration::ZERO` means an
/// abortive close (spec §6).
#[derive(Clone, Copy, Debug)]
pub struct LingerOptions {
    pub timeout: Duration,
}

impl LingerOptions {
    pub fn is_abortive(&self) -> bool {
        self.timeout.is_zero()
    }
}

impl Default for StreamSocketOptions {
    fn default() -> Self {
        Self {
            reuse_address: false,
            read_queue_watermarks: WatermarkOptions::default(),
            write_queue_watermarks: WatermarkOptions::default(),
            min_incoming_transfer_size: 1,
            max_incoming_transfer_size: 64 * 1024,
            send_greedily: false,
            receive_greedily: false,
            send_buffer_size: None,
            receive_buffer_size: None,
            keep_alive: false,
            no_delay: false,
            keep_half_open: false,
            linger: None,
            timestamp_outgoing_data: false,
            timestamp_incoming_data: false,
            load_balancing: LoadBalancingOptions::default(),
        }
    }
}

impl StreamSocketOptions {
    pub fn with_reuse_address(mut self, value: bool) -> Self {
        self.reuse_address = value;
        self
    }

    pub fn with_watermarks(mut self, read: WatermarkOptions, write: WatermarkOptions) -> Self {
        self.read_queue_watermarks = read;
        self.write_queue_watermarks = write;
        self
    }

    pub fn with_no_delay(mut self, value: bool) -> Self {
        self.no_delay = value;
        self
    }

    pub fn with_keep_alive(mut self, value: bool) -> Self {
        self.keep_alive = value;
        self
    }

    pub fn with_linger(mut self, options: LingerOptions) -> Self {
        self.linger = Some(options);
        self
    }

    pub fn with_timestamping(mut self, outgoing: bool, incoming: bool) -> Self {
        self.timestamp_outgoing_data = outgoing;
        self.timestamp_incoming_data = incoming;
        self
    }
}

/// Datagram sockets share the stream option set minus stream-only
/// concepts (`no_delay`, `keep_half_open`); modeled as a thin wrapper so
/// callers get datagram-appropriate defaults without duplicating fields.
#[derive(Clone, Debug)]
pub struct DatagramSocketOptions {
    pub reuse_address: bool,
    pub read_queue_watermarks: WatermarkOptions,
    pub write_queue_watermarks: WatermarkOptions,
    pub send_buffer_size: Option<usize>,
    pub receive_buffer_size: Option<usize>,
    pub timestamp_outgoing_data: bool,
    pub timestamp_incoming_data: bool,
    pub load_balancing: LoadBalancingOptions,
}

impl Default for DatagramSocketOptions {
    fn default() -> Self {
        Self {
            reuse_address: false,
            read_queue_watermarks: WatermarkOptions::default(),
            write_queue_watermarks: WatermarkOptions::default(),
            send_buffer_size: None,
            receive_buffer_size: None,
            timestamp_outgoing_data: false,
            timestamp_incoming_data: false,
            load_balancing: LoadBalancingOptions::default(),
        }
    }
}

/// Listener-specific options: backlog plus the subset of stream options
/// that apply to accepted sockets by default.
#[derive(Clone, Debug)]
pub struct ListenerSocketOptions {
    pub reuse_address: bool,
    pub backlog: u32,
    pub accepted_socket_options: StreamSocketOptions,
}

impl Default for ListenerSocketOptions {
    fn default() -> Self {
        Self {
            reuse_address: true,
            backlog: 1024,
            accepted_socket_options: StreamSocketOptions::default(),
        }
    }
}
