//! Tenant lookup by id and by dialled number.

use parley_types::TenantProfile;
use std::collections::HashMap;

/// Strips formatting so `+1 (555) 010-0100` and `+15550100100` compare equal.
pub fn normalize_number(number: &str) -> String {
    number
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect()
}

#[derive(Debug, Default)]
pub struct TenantDirectory {
    tenants: HashMap<String, TenantProfile>,
    numbers: HashMap<String, String>,
}

impl TenantDirectory {
    pub fn new(tenants: impl IntoIterator<Item = TenantProfile>) -> Self {
        let mut directory = Self::default();
        for tenant in tenants {
            for number in &tenant.inbound_numbers {
                let normalized = normalize_number(number);
                if let Some(previous) = directory.numbers.insert(normalized, tenant.id.clone()) {
                    tracing::warn!(
                        number = %number,
                        previous = %previous,
                        tenant_id = %tenant.id,
                        "inbound number assigned to more than one tenant, last one wins"
                    );
                }
            }
            directory.tenants.insert(tenant.id.clone(), tenant);
        }
        directory
    }

    pub fn get(&self, tenant_id: &str) -> Option<&TenantProfile> {
        self.tenants.get(tenant_id)
    }

    /// The tenant answering calls to `number`.
    pub fn by_inbound_number(&self, number: &str) -> Option<&TenantProfile> {
        self.numbers
            .get(&normalize_number(number))
            .and_then(|id| self.tenants.get(id))
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }
}
