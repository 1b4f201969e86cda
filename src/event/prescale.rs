//! Prescale factors per trigger type

use tracing::{debug, warn};

/// Number of prescalable trigger types (1..=8)
pub const MAX_PRESCALE: usize = 8;

/// Prescale registers of triggers 1-4 are 24 bits wide, 5-8 are 16 bits
const WIDE_TRIGGERS: usize = 4;
const WIDE_MASK: u32 = 0x00FF_FFFF;
const NARROW_MASK: u32 = 0x0000_FFFF;

/// First register word of a TS prescale record
const REGISTER_OFFSET: usize = 2;

/// Trigger type → prescale factor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrescaleTable {
    factors: [Option<u32>; MAX_PRESCALE],
}

impl Default for PrescaleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PrescaleTable {
    pub fn new() -> Self {
        Self {
            factors: [None; MAX_PRESCALE],
        }
    }

    /// Prescale factor of a trigger type; 1 when unknown
    pub fn factor(&self, trigger: u32) -> u32 {
        Self::index(trigger)
            .and_then(|i| self.factors[i])
            .unwrap_or(1)
    }

    /// True once a factor has been recorded for the trigger
    pub fn is_loaded(&self, trigger: u32) -> bool {
        Self::index(trigger).is_some_and(|i| self.factors[i].is_some())
    }

    pub fn set(&mut self, trigger: u32, factor: u32) -> bool {
        match Self::index(trigger) {
            Some(i) => {
                self.factors[i] = Some(factor);
                true
            }
            None => false,
        }
    }

    /// Load a trigger-supervisor register record (whole event buffer)
    ///
    /// Register value N means "accept 1 in N"; a zero register selects the
    /// full counter range.
    pub fn load_registers(&mut self, event: &[u32]) -> usize {
        let registers = event.get(REGISTER_OFFSET..).unwrap_or(&[]);
        let mut loaded = 0;
        for (i, &reg) in registers.iter().take(MAX_PRESCALE).enumerate() {
            let (mask, range) = if i < WIDE_TRIGGERS {
                (WIDE_MASK, 1u32 << 24)
            } else {
                (NARROW_MASK, 1u32 << 16)
            };
            let value = reg & mask;
            self.factors[i] = Some(if value == 0 { range } else { value });
            loaded += 1;
        }
        if loaded < MAX_PRESCALE {
            warn!(
                registers = loaded,
                "short prescale register record, remaining triggers keep their factors"
            );
        }
        loaded
    }

    /// Load a `psN=value` text record
    pub fn load_text(&mut self, text: &str) -> usize {
        let mut loaded = 0;
        for token in text.split_whitespace() {
            let Some(rest) = token.strip_prefix("ps") else {
                continue;
            };
            let Some((trigger, value)) = rest.split_once('=') else {
                continue;
            };
            match (trigger.parse::<u32>(), value.parse::<u32>()) {
                (Ok(trigger), Ok(value)) if self.set(trigger, value) => loaded += 1,
                _ => debug!(token, "ignoring prescale token"),
            }
        }
        loaded
    }

    fn index(trigger: u32) -> Option<usize> {
        match trigger as usize {
            t @ 1..=MAX_PRESCALE => Some(t - 1),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_factor() {
        let table = PrescaleTable::new();
        assert_eq!(table.factor(1), 1);
        assert_eq!(table.factor(0), 1);
        assert_eq!(table.factor(99), 1);
        assert!(!table.is_loaded(1));
    }

    #[test]
    fn test_load_registers() {
        let mut table = PrescaleTable::new();
        let event = [
            9,
            120 << 16,
            1,
            10,
            0,
            0xFF00_0003,
            0x0012_3456,
            0,
            0xABCD_0002,
            7,
        ];
        assert_eq!(table.load_registers(&event), 8);
        assert_eq!(table.factor(1), 1);
        assert_eq!(table.factor(2), 10);
        assert_eq!(table.factor(3), 1 << 24);
        assert_eq!(table.factor(4), 3);
        assert_eq!(table.factor(5), 0x3456);
        assert_eq!(table.factor(6), 1 << 16);
        assert_eq!(table.factor(7), 2);
        assert_eq!(table.factor(8), 7);
        assert!(table.is_loaded(8));
    }

    #[test]
    fn test_short_register_record() {
        let mut table = PrescaleTable::new();
        table.set(5, 9);
        assert_eq!(table.load_registers(&[3, 120 << 16, 4, 2]), 2);
        assert_eq!(table.factor(1), 4);
        assert_eq!(table.factor(2), 2);
        assert_eq!(table.factor(5), 9);
    }

    #[test]
    fn test_load_text() {
        let mut table = PrescaleTable::new();
        let n = table.load_text("ps1=100 ps2=1\nps4=65535 ps9=3 bogus ps3=x");
        assert_eq!(n, 3);
        assert_eq!(table.factor(1), 100);
        assert_eq!(table.factor(2), 1);
        assert_eq!(table.factor(3), 1);
        assert_eq!(table.factor(4), 65535);
        assert!(!table.is_loaded(3));
    }
}
