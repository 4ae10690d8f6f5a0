/// The resource allowance a tenant registers for.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TenantSize {
    Small,
    Medium,
    Large,
}

/// Hard compute limits for every workload in a tenant's namespace.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Quota {
    pub cpu_millis: i64,
    pub memory_gib: i64,
}

// === impl TenantSize ===

impl TenantSize {
    pub fn quota(self) -> Quota {
        match self {
            Self::Small => Quota {
                cpu_millis: 1000,
                memory_gib: 2,
            },
            Self::Medium => Quota {
                cpu_millis: 2000,
                memory_gib: 4,
            },
            Self::Large => Quota {
                cpu_millis: 4000,
                memory_gib: 8,
            },
        }
    }
}

// === impl Quota ===

impl Quota {
    /// The CPU limit as a Kubernetes quantity.
    pub fn cpu(&self) -> String {
        format!("{}m", self.cpu_millis)
    }

    /// The memory limit as a Kubernetes quantity.
    pub fn memory(&self) -> String {
        format!("{}Gi", self.memory_gib)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_double_their_allowance() {
        assert_eq!(TenantSize::Small.quota().cpu(), "1000m");
        assert_eq!(TenantSize::Small.quota().memory(), "2Gi");
        assert_eq!(TenantSize::Medium.quota().cpu(), "2000m");
        assert_eq!(TenantSize::Medium.quota().memory(), "4Gi");
        assert_eq!(TenantSize::Large.quota().cpu(), "4000m");
        assert_eq!(TenantSize::Large.quota().memory(), "8Gi");
    }
}
