//! Adapters — concrete implementations of the hexagonal port traits.
//!
//! | Adapter         | Implements        | Connects to                     |
//! |-----------------|-------------------|---------------------------------|
//! | `sim_device`    | DevicePort        | Simulated line node server      |
//! | `memory_twin`   | TwinStore         | In-process twin registry        |
//! | `memory_bus`    | EventPublisher    | In-process fan-out event bus    |
//! | `method_router` | CommandChannel    | Per-device method inboxes       |
//! |                 | MethodInbox       |                                 |
//! | `log_sink`      | BatchHandler      | Process logger (telemetry)      |

pub mod log_sink;
pub mod memory_bus;
pub mod memory_twin;
pub mod method_router;
pub mod sim_device;
