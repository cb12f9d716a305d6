//! Close Path Tuning
//!
//! The delayed-close high-water mark scales with the size of the machine,
//! the way the FAT driver sizes it at initialization. Both knobs can be
//! changed on a running driver.

/// Base high-water mark for delayed closes
pub const FAT_MAX_DELAYED_CLOSES: usize = 16;

/// Closes done on one volume before the worker checks for lock waiters
pub const FAT_CLOSE_YIELD_INTERVAL: u32 = 20;

/// Memory size class of the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SystemSize {
    /// Small memory configuration
    Small,
    /// Medium memory configuration
    #[default]
    Medium,
    /// Large memory configuration
    Large,
}

/// Close path configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseConfig {
    /// Delayed closes allowed to accumulate before the worker is started
    pub max_delayed_close_count: usize,
    /// Closes done under one volume acquisition before yielding to waiters
    pub close_yield_interval: u32,
}

impl CloseConfig {
    /// Configuration for a machine of the given size
    pub const fn for_system_size(size: SystemSize) -> Self {
        let max_delayed_close_count = match size {
            SystemSize::Small => FAT_MAX_DELAYED_CLOSES,
            SystemSize::Medium => 4 * FAT_MAX_DELAYED_CLOSES,
            SystemSize::Large => 16 * FAT_MAX_DELAYED_CLOSES,
        };

        Self {
            max_delayed_close_count,
            close_yield_interval: FAT_CLOSE_YIELD_INTERVAL,
        }
    }
}

impl Default for CloseConfig {
    fn default() -> Self {
        Self::for_system_size(SystemSize::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_size_tiers() {
        assert_eq!(CloseConfig::for_system_size(SystemSize::Small).max_delayed_close_count, 16);
        assert_eq!(CloseConfig::for_system_size(SystemSize::Medium).max_delayed_close_count, 64);
        assert_eq!(CloseConfig::for_system_size(SystemSize::Large).max_delayed_close_count, 256);

        let config = CloseConfig::default();
        assert_eq!(config.max_delayed_close_count, 64);
        assert_eq!(config.close_yield_interval, 20);
    }
}
