//! IRQ isolation for latency-sensitive containers
//!
//! - `mask` - the default IRQ affinity bitmap
//! - `irqbalance` - the irqbalance banned-CPU configuration and boot-time restore
//! - `affinity` - per-container enable/disable of IRQ balancing

pub mod affinity;
pub mod irqbalance;
pub mod mask;

pub use affinity::set_irq_load_balancing;
pub use irqbalance::{restore_irqbalance_config, IRQBALANCE_BANNED_CPUS, IRQBALANCE_NAME};
pub use mask::{update_irq_smp_affinity_mask, IrqAffinityMask};
