// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Boot-time sizing of the kernel tables.

use ember_abi::layout::NENV;

/// Default number of CPUs the kernel tracks.
pub const DEFAULT_NCPU: usize = 8;
/// Default number of physical page frames (128 MiB of 4 KiB pages).
pub const DEFAULT_NFRAMES: usize = 32 * 1024;

/// Table sizes chosen at boot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernelConfig {
    /// Environment table slots.
    pub nenv: usize,
    /// CPUs.
    pub ncpu: usize,
    /// Physical page frames.
    pub nframes: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self { nenv: NENV, ncpu: DEFAULT_NCPU, nframes: DEFAULT_NFRAMES }
    }
}

impl KernelConfig {
    pub const fn with_envs(mut self, nenv: usize) -> Self {
        self.nenv = nenv;
        self
    }

    pub const fn with_cpus(mut self, ncpu: usize) -> Self {
        self.ncpu = ncpu;
        self
    }

    pub const fn with_frames(mut self, nframes: usize) -> Self {
        self.nframes = nframes;
        self
    }

    /// Checks the sizes against what environment ids and CPU ids can address.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nenv == 0 || self.nenv > NENV {
            return Err(ConfigError::EnvCount(self.nenv));
        }
        if self.ncpu == 0 || self.ncpu > usize::from(u16::MAX) {
            return Err(ConfigError::CpuCount(self.ncpu));
        }
        if self.nframes == 0 || self.nframes > u32::MAX as usize {
            return Err(ConfigError::FrameCount(self.nframes));
        }
        Ok(())
    }
}

/// Rejected [`KernelConfig`].
#[must_use = "configuration errors must be handled"]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// Environment slots must be in `1..=NENV`.
    EnvCount(usize),
    /// At least one CPU is required.
    CpuCount(usize),
    /// At least one frame is required.
    FrameCount(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_id_space() {
        let config = KernelConfig::default();
        assert_eq!(config.nenv, NENV);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn rejects_out_of_range_sizes() {
        let base = KernelConfig::default();
        assert_eq!(base.with_envs(0).validate(), Err(ConfigError::EnvCount(0)));
        assert_eq!(base.with_envs(NENV + 1).validate(), Err(ConfigError::EnvCount(NENV + 1)));
        assert_eq!(base.with_cpus(0).validate(), Err(ConfigError::CpuCount(0)));
        assert_eq!(base.with_frames(0).validate(), Err(ConfigError::FrameCount(0)));
    }
}
