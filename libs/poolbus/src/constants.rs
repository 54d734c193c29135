//! Pool bus wire constants
//!
//! Byte values and timing defaults observed on the RS-485 equipment bus.
//! Two frame grammars share the wire:
//!
//! ```text
//! standard:    FF A5 <pre> <dest> <src> <action> <len> <payload..len> <chkHi> <chkLo>
//! chlorinator: 10 02 <dest> <action> <payload..> <chk> 10 03
//! ```

// ============================================================================
// Framing
// ============================================================================

/// Out-of-band marker that precedes the standard sync byte
pub const STANDARD_MARKER: u8 = 0xFF;

/// Sync byte that opens the checksummed part of a standard frame
pub const STANDARD_SYNC: u8 = 0xA5;

/// Header bytes counted from the sync byte: A5, preamble, dest, src, action, len
pub const STANDARD_HEADER_LEN: usize = 6;

/// Standard checksum width (16-bit big-endian)
pub const STANDARD_CHECKSUM_LEN: usize = 2;

/// Offset of the declared payload length, counted from the 0xFF marker
pub const STANDARD_LEN_OFFSET: usize = 6;

/// Default sanity ceiling for a standard frame, counted from the sync byte
pub const DEFAULT_MAX_STANDARD_FRAME_LEN: usize = 100;

/// Wire prefix prepended to every outbound standard frame
pub const OUTBOUND_PREFIX: [u8; 3] = [0xFF, 0x00, 0xFF];

/// Chlorinator frame header
pub const CHLOR_HEADER: [u8; 2] = [0x10, 0x02];

/// Chlorinator frame trailer
pub const CHLOR_TRAILER: [u8; 2] = [0x10, 0x03];

/// Smallest possible chlorinator frame: header, dest, action, checksum, trailer
pub const CHLOR_MIN_FRAME_LEN: usize = 7;

/// Longest chlorinator candidate held while waiting for its trailer
pub const CHLOR_MAX_FRAME_LEN: usize = 40;

/// Chlorinator destination byte for frames addressed to the panel/app
pub const CHLOR_DEST_CONTROLLER: u8 = 0x00;

/// Chlorinator destination byte for frames addressed to the cell
pub const CHLOR_DEST_CELL: u8 = 0x50;

// ============================================================================
// Addresses
// ============================================================================

/// Default source address used by this application
pub const DEFAULT_APP_ADDRESS: u8 = 33;

/// Panel (controller) bus address
pub const DEFAULT_CONTROLLER_ADDRESS: u8 = 16;

/// Broadcast destination used by panels for status chatter
pub const BROADCAST_ADDRESS: u8 = 15;

/// First pump address
pub const DEFAULT_PUMP_ADDRESS_BASE: u8 = 96;

/// Number of addresses reserved for pumps
pub const DEFAULT_PUMP_ADDRESS_COUNT: u8 = 16;

/// Chlorinator cell addresses (80..=83)
pub const CHLOR_ADDRESS_BASE: u8 = 80;
pub const CHLOR_ADDRESS_COUNT: u8 = 4;

/// Preamble byte used on frames built for pumps
pub const PUMP_PREAMBLE: u8 = 0x00;

/// Preamble byte used for panel frames until one has been observed
pub const DEFAULT_CONTROLLER_PREAMBLE: u8 = 33;

// ============================================================================
// Action codes
// ============================================================================

pub const ACTION_ACK: u8 = 1;
pub const ACTION_PUMP_STATUS: u8 = 7;
pub const ACTION_VERSION_RESPONSE: u8 = 252;
pub const ACTION_VERSION_REQUEST: u8 = 253;

/// Controller actions whose low six bits collide between different records
pub const AMBIGUOUS_CONTROLLER_ACTIONS: [u8; 3] = [10, 11, 17];

/// Mask that strips the get/set/broadcast bits from a controller action
pub const CONTROLLER_ACTION_MASK: u8 = 63;

/// Controller set actions eligible for an automatic follow-up get
pub const CONTROLLER_SET_ACTIONS: std::ops::RangeInclusive<u8> = 131..=168;

/// Offset between a controller set action and its matching get
pub const CONTROLLER_GET_OFFSET: u8 = 64;

/// (request, response) action pairs accepted for chlorinator correlation
pub const CHLOR_ACK_PAIRS: [(u8, u8); 4] = [(0, 1), (17, 18), (21, 18), (20, 3)];

// ============================================================================
// Equipment values
// ============================================================================

/// Chlorinator status forced after the cell has been silent too long
pub const CHLOR_STATUS_LOST_COMM: u8 = 128;

/// Chlorinator output value that requests super-chlorination
pub const CHLOR_SUPER_CHLORINATE: u8 = 101;

/// Salt level scale applied to the raw byte
pub const SALT_SCALE: u16 = 50;

/// Start hour value that marks a schedule as an egg timer
pub const EGG_TIMER_START_HOUR: u8 = 25;

/// Pump run-duration sentinel meaning "run until told otherwise"
pub const RUN_INDEFINITELY: f64 = -1.0;

// ============================================================================
// Timing defaults
// ============================================================================

/// Delay between a write and its retry decision
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 175;

/// Delay applied when a retry is deferred because the bus is busy
pub const DEFAULT_DEFER_INTERVAL_MS: u64 = 150;

/// Inbound messages that must be seen before a rewrite is allowed
pub const DEFAULT_MIN_INBOUND_BETWEEN_WRITES: u64 = 4;

/// Consecutive deferrals allowed before a rewrite is forced
pub const DEFAULT_MAX_SKIPS: u32 = 2;

/// Attempts after which a warning is logged
pub const DEFAULT_WARN_AFTER_ATTEMPTS: u32 = 5;

/// Attempts after which a request is abandoned
pub const DEFAULT_ABORT_AFTER_ATTEMPTS: u32 = 10;

/// Pump status poll and run-duration tick
pub const DEFAULT_PUMP_TICK_SECS: u64 = 30;

/// Chlorinator keep-alive while producing
pub const DEFAULT_CHLOR_ACTIVE_SECS: u64 = 4;

/// Chlorinator keep-alive while idle
pub const DEFAULT_CHLOR_IDLE_SECS: u64 = 30 * 60;

/// Silence after which the chlorinator is considered lost
pub const DEFAULT_CHLOR_COMM_LOSS_SECS: u64 = 30;

/// Minutes removed from a pump run-duration on every tick
pub const PUMP_TICK_MINUTES: f64 = 0.5;

/// First circuit id mapped onto features when the panel model is unknown
pub const DEFAULT_FEATURE_BASE_CIRCUIT: u8 = 11;
