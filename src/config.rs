pub const DEFAULT_STACK_CAPACITY: usize = 256 * 20;
pub const DEFAULT_CALL_INFO_CAPACITY: usize = 256;

/// Interpreter construction options. A zero capacity selects the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Slots in the value stack shared by every frame.
    pub stack_capacity: usize,
    /// Maximum number of simultaneously active calls.
    pub call_info_capacity: usize,
    /// Log every executed instruction at `trace` level.
    pub debug_tracing: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            stack_capacity: DEFAULT_STACK_CAPACITY,
            call_info_capacity: DEFAULT_CALL_INFO_CAPACITY,
            debug_tracing: false,
        }
    }
}

impl Config {
    pub fn with_stack_capacity(mut self, capacity: usize) -> Self {
        self.stack_capacity = capacity;
        self
    }

    pub fn with_call_info_capacity(mut self, capacity: usize) -> Self {
        self.call_info_capacity = capacity;
        self
    }

    pub fn with_debug_tracing(mut self, on: bool) -> Self {
        self.debug_tracing = on;
        self
    }

    pub(crate) fn normalized(self) -> Self {
        let defaults = Config::default();
        Config {
            stack_capacity: if self.stack_capacity == 0 { defaults.stack_capacity } else { self.stack_capacity },
            call_info_capacity: if self.call_info_capacity == 0 {
                defaults.call_info_capacity
            } else {
                self.call_info_capacity
            },
            debug_tracing: self.debug_tracing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacities_fall_back_to_defaults() {
        let cfg = Config { stack_capacity: 0, call_info_capacity: 0, debug_tracing: true }.normalized();
        assert_eq!(cfg.stack_capacity, 5120);
        assert_eq!(cfg.call_info_capacity, 256);
        assert!(cfg.debug_tracing);
    }

    #[test]
    fn builder_overrides() {
        let cfg = Config::default().with_stack_capacity(64).with_call_info_capacity(8);
        assert_eq!(cfg.normalized(), Config { stack_capacity: 64, call_info_capacity: 8, debug_tracing: false });
    }
}
