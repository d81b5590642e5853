//! IRQ affinity masks
//!
//! `/proc/irq/default_smp_affinity` holds a hex bitmap over CPUs, most
//! significant digit first, split into comma-separated groups of 8 digits
//! (32 CPUs) counted from the right:
//!
//! ```text
//! 8 CPUs:   ff
//! 40 CPUs:  ff,ffffffff
//! ```
//!
//! Bit `i` set means CPU `i` may service interrupts. The mask keeps the width
//! it was read with, so writing it back never changes the group layout.

use std::fmt;

use crate::cpuset::CpuSet;
use crate::error::HookError;

const DIGITS_PER_GROUP: usize = 8;
const CPUS_PER_DIGIT: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrqAffinityMask {
    /// One entry per hex digit, most significant first
    digits: Vec<u8>,
}

impl IrqAffinityMask {
    pub fn parse(mask: &str) -> Result<Self, HookError> {
        let digits = mask
            .trim()
            .chars()
            .filter(|c| *c != ',')
            .map(|c| {
                c.to_digit(16).map(|d| d as u8).ok_or_else(|| {
                    HookError::InvalidAffinityMask(format!("invalid hex digit {:?} in {:?}", c, mask))
                })
            })
            .collect::<Result<Vec<u8>, HookError>>()?;

        if digits.is_empty() {
            return Err(HookError::InvalidAffinityMask("empty mask".to_string()));
        }
        Ok(Self { digits })
    }

    /// Number of CPUs the mask can describe
    pub fn width(&self) -> usize {
        self.digits.len() * CPUS_PER_DIGIT
    }

    fn position(&self, cpu: usize) -> Result<(usize, u8), HookError> {
        if cpu >= self.width() {
            return Err(HookError::InvalidAffinityMask(format!(
                "cpu {} is outside of the {}-cpu mask",
                cpu,
                self.width()
            )));
        }
        let index = self.digits.len() - 1 - cpu / CPUS_PER_DIGIT;
        Ok((index, 1 << (cpu % CPUS_PER_DIGIT)))
    }

    pub fn set_cpu(&mut self, cpu: usize) -> Result<(), HookError> {
        let (index, bit) = self.position(cpu)?;
        self.digits[index] |= bit;
        Ok(())
    }

    pub fn clear_cpu(&mut self, cpu: usize) -> Result<(), HookError> {
        let (index, bit) = self.position(cpu)?;
        self.digits[index] &= !bit;
        Ok(())
    }

    pub fn test_cpu(&self, cpu: usize) -> bool {
        self.position(cpu)
            .map(|(index, bit)| self.digits[index] & bit != 0)
            .unwrap_or(false)
    }

    /// CPUs whose bit is set
    pub fn cpus(&self) -> CpuSet {
        (0..self.width()).filter(|cpu| self.test_cpu(*cpu)).collect()
    }

    /// Complement over the same width
    pub fn inverted(&self) -> Self {
        Self {
            digits: self.digits.iter().map(|d| !d & 0xf).collect(),
        }
    }

    /// Whether the mask looks like the kernel default (every possible CPU set)
    ///
    /// The kernel prints exactly as many digits as needed for the possible
    /// CPUs, so the default is all `f` apart from a leading digit that holds
    /// a non-empty run of low bits.
    pub fn is_all_set(&self) -> bool {
        let (first, rest) = match self.digits.split_first() {
            Some(split) => split,
            None => return false,
        };
        *first != 0 && first & (first + 1) == 0 && rest.iter().all(|d| *d == 0xf)
    }
}

impl fmt::Display for IrqAffinityMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.digits.len();
        for (i, digit) in self.digits.iter().enumerate() {
            if i > 0 && (len - i) % DIGITS_PER_GROUP == 0 {
                f.write_str(",")?;
            }
            write!(f, "{:x}", digit)?;
        }
        Ok(())
    }
}

/// Clear (disable) or set (enable) the container CPUs in `current`
///
/// Returns the new affinity mask and the complementary banned-CPU mask for
/// irqbalance, both in the kernel format.
pub fn update_irq_smp_affinity_mask(
    cpus: &CpuSet,
    current: &str,
    enable: bool,
) -> Result<(String, String), HookError> {
    let mut mask = IrqAffinityMask::parse(current)?;
    for cpu in cpus.iter() {
        if enable {
            mask.set_cpu(cpu)?;
        } else {
            mask.clear_cpu(cpu)?;
        }
    }
    let banned = mask.inverted();
    Ok((mask.to_string(), banned.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disable_and_enable_on_eight_cpus() {
        let cpus = CpuSet::parse("4-7").unwrap();

        let (mask, banned) = update_irq_smp_affinity_mask(&cpus, "ff", false).unwrap();
        assert_eq!(mask, "0f");
        assert_eq!(banned, "f0");
        let parsed = IrqAffinityMask::parse(&mask).unwrap();
        assert_eq!(parsed.cpus().to_string(), "0-3");

        let (mask, banned) = update_irq_smp_affinity_mask(&cpus, &mask, true).unwrap();
        assert_eq!(mask, "ff");
        assert_eq!(banned, "00");
    }

    #[test]
    fn test_groups_are_preserved() {
        let cpus = CpuSet::parse("0,32-35").unwrap();
        let (mask, banned) =
            update_irq_smp_affinity_mask(&cpus, "ff,ffffffff", false).unwrap();
        assert_eq!(mask, "f0,fffffffe");
        assert_eq!(banned, "0f,00000001");
    }

    #[test]
    fn test_cpu_outside_mask() {
        let cpus = CpuSet::parse("8").unwrap();
        assert!(matches!(
            update_irq_smp_affinity_mask(&cpus, "ff", false),
            Err(HookError::InvalidAffinityMask(_))
        ));
    }

    #[test]
    fn test_is_all_set() {
        for mask in ["f", "ff", "3f", "1,ffffffff", "ffffffff,ffffffff"] {
            assert!(IrqAffinityMask::parse(mask).unwrap().is_all_set(), "{}", mask);
        }
        for mask in ["0f", "f0", "fe", "5f", "00000000", "ff,fffffff7"] {
            assert!(!IrqAffinityMask::parse(mask).unwrap().is_all_set(), "{}", mask);
        }
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(IrqAffinityMask::parse("").is_err());
        assert!(IrqAffinityMask::parse("fg").is_err());
    }
}
