use std::collections::HashSet;
use std::net::TcpListener;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::Rng;

use crate::error::{FleetError, Result};
use crate::models::PortSet;

pub const MIN_BASE_PORT: u16 = 1024;
/// Highest base that still leaves room for the largest offset.
pub const MAX_BASE_PORT: u16 = u16::MAX - 3000;
const RANDOM_BASE_RANGE: std::ops::RangeInclusive<u16> = 3000..=9000;
const REVERIFY_ROUNDS: usize = 3;

const OFFSET_GATEWAY_HTTP: u16 = 0;
const OFFSET_GATEWAY_HTTPS: u16 = 443;
const OFFSET_DATABASE: u16 = 1000;
const OFFSET_POOL_PROXY: u16 = 1001;
const OFFSET_ADMIN_UI: u16 = 2000;
const OFFSET_TELEMETRY: u16 = 3000;

/// Hands out port sets and remembers what it handed out, so two instances
/// never share a port even while one of them is stopped.
pub struct PortAllocator {
    allocated: Mutex<HashSet<u16>>,
    scan_limit: u32,
}

impl PortAllocator {
    pub fn new(scan_limit: u32) -> Self {
        Self {
            allocated: Mutex::new(HashSet::new()),
            scan_limit,
        }
    }

    pub fn allocate(&self, base_port: Option<u16>) -> Result<PortSet> {
        let base = match base_port {
            Some(base) => {
                validate_base(base)?;
                base
            }
            None => rand::rng().random_range(RANDOM_BASE_RANGE),
        };

        let mut allocated = self.lock();
        let mut chosen: Vec<u16> = Vec::with_capacity(6);
        let mut ports = [0u16; 6];
        let offsets = [
            ("gateway-http", OFFSET_GATEWAY_HTTP),
            ("gateway-https", OFFSET_GATEWAY_HTTPS),
            ("admin-ui", OFFSET_ADMIN_UI),
            ("database", OFFSET_DATABASE),
            ("pool-proxy", OFFSET_POOL_PROXY),
            ("telemetry", OFFSET_TELEMETRY),
        ];
        for (idx, (service, offset)) in offsets.iter().enumerate() {
            let port = self.scan_from(service, base + offset, &allocated, &chosen)?;
            chosen.push(port);
            ports[idx] = port;
        }

        // Another process may have grabbed a port while the rest were probed.
        for _ in 0..REVERIFY_ROUNDS {
            let lost: Vec<usize> = (0..ports.len())
                .filter(|&i| !is_port_free(ports[i]))
                .collect();
            if lost.is_empty() {
                break;
            }
            for idx in lost {
                let (service, _) = offsets[idx];
                tracing::debug!(service, port = ports[idx], "port taken during allocation, rescanning");
                let start = ports[idx].saturating_add(1);
                let others: Vec<u16> = ports
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != idx)
                    .map(|(_, p)| *p)
                    .collect();
                ports[idx] = self.scan_from(service, start, &allocated, &others)?;
            }
        }

        let set = PortSet {
            gateway_http: ports[0],
            gateway_https: ports[1],
            admin_ui: ports[2],
            database: ports[3],
            pool_proxy: ports[4],
            telemetry: ports[5],
        };
        if !set.entries().iter().all(|(_, p)| is_port_free(*p)) {
            return Err(FleetError::PortExhaustion {
                service: "port set".into(),
                start: base,
                attempts: self.scan_limit,
            });
        }
        allocated.extend(ports);
        tracing::debug!(base, ?set, "allocated port set");
        Ok(set)
    }

    /// Mark an existing instance's ports as taken without probing them.
    pub fn reserve(&self, ports: &PortSet) {
        let mut allocated = self.lock();
        allocated.extend(ports.entries().iter().map(|(_, p)| *p));
    }

    pub fn release(&self, ports: &PortSet) {
        let mut allocated = self.lock();
        for (_, port) in ports.entries() {
            allocated.remove(&port);
        }
    }

    pub fn is_reserved(&self, port: u16) -> bool {
        self.lock().contains(&port)
    }

    fn scan_from(
        &self,
        service: &str,
        start: u16,
        allocated: &HashSet<u16>,
        chosen: &[u16],
    ) -> Result<u16> {
        for attempt in 0..self.scan_limit {
            let Ok(port) = u16::try_from(u32::from(start) + attempt) else {
                break;
            };
            if allocated.contains(&port) || chosen.contains(&port) {
                continue;
            }
            if is_port_free(port) {
                return Ok(port);
            }
        }
        Err(FleetError::PortExhaustion {
            service: service.to_string(),
            start,
            attempts: self.scan_limit,
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<u16>> {
        self.allocated.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(1000)
    }
}

pub fn validate_base(base: u16) -> Result<()> {
    if !(MIN_BASE_PORT..=MAX_BASE_PORT).contains(&base) {
        return Err(FleetError::Validation(format!(
            "base port {base} must be between {MIN_BASE_PORT} and {MAX_BASE_PORT}"
        )));
    }
    Ok(())
}

/// Bind-then-drop probe on all interfaces.
pub fn is_port_free(port: u16) -> bool {
    TcpListener::bind(("0.0.0.0", port)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Finds a base whose six offset ports are all currently free.
    fn free_base() -> u16 {
        (20000..40000)
            .step_by(97)
            .find(|&b| {
                [0, 443, 1000, 1001, 2000, 3000]
                    .iter()
                    .all(|o| is_port_free(b + o))
            })
            .unwrap()
    }

    #[test]
    fn allocate_uses_fixed_offsets_when_free() {
        let allocator = PortAllocator::default();
        let base = free_base();
        let ports = allocator.allocate(Some(base)).unwrap();
        assert_eq!(ports.gateway_http, base);
        assert_eq!(ports.gateway_https, base + 443);
        assert_eq!(ports.database, base + 1000);
        assert_eq!(ports.pool_proxy, base + 1001);
        assert_eq!(ports.admin_ui, base + 2000);
        assert_eq!(ports.telemetry, base + 3000);
        assert!(ports.is_pairwise_distinct());
    }

    #[test]
    fn random_base_yields_distinct_ports() {
        let allocator = PortAllocator::default();
        let ports = allocator.allocate(None).unwrap();
        assert!(ports.is_pairwise_distinct());
        assert!(ports.gateway_http >= 3000);
    }

    #[test]
    fn reserved_ports_are_skipped() {
        let allocator = PortAllocator::default();
        let base = free_base();
        let first = allocator.allocate(Some(base)).unwrap();
        let second = allocator.allocate(Some(base)).unwrap();
        for (_, port) in second.entries() {
            assert!(!first.contains(port), "port {port} handed out twice");
        }
        assert!(second.is_pairwise_distinct());
    }

    #[test]
    fn occupied_port_scans_forward() {
        let allocator = PortAllocator::default();
        let base = free_base();
        let _held = TcpListener::bind(("0.0.0.0", base)).unwrap();
        let ports = allocator.allocate(Some(base)).unwrap();
        assert_ne!(ports.gateway_http, base);
        assert!(ports.gateway_http > base);
    }

    #[test]
    fn exhaustion_when_scan_limit_too_small() {
        let allocator = PortAllocator::new(1);
        let base = free_base();
        let _held = TcpListener::bind(("0.0.0.0", base)).unwrap();
        let err = allocator.allocate(Some(base)).unwrap_err();
        assert!(matches!(err, FleetError::PortExhaustion { .. }));
    }

    #[test]
    fn base_port_out_of_range_is_rejected() {
        let allocator = PortAllocator::default();
        assert!(matches!(
            allocator.allocate(Some(80)),
            Err(FleetError::Validation(_))
        ));
        assert!(matches!(
            allocator.allocate(Some(64000)),
            Err(FleetError::Validation(_))
        ));
    }

    #[test]
    fn release_frees_reservation() {
        let allocator = PortAllocator::default();
        let ports = allocator.allocate(None).unwrap();
        assert!(allocator.is_reserved(ports.database));
        allocator.release(&ports);
        assert!(!allocator.is_reserved(ports.database));
    }
}
