//! Process-definition cache keyed by service id.
//!
//! Lets the probing unit factory skip the database for processes registered
//! through the operator service. Entries are never evicted; the scheduler
//! facade invalidates them when a namespace is renamed or a job is removed.

use std::collections::HashMap;

use dashmap::DashMap;
use tracing::debug;

use crate::domain::{MonitoredProcess, Service};

/// Default maximum number of cached services.
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct CachedService {
    service: Service,
    processes: HashMap<String, MonitoredProcess>,
}

/// Bounded cache of service and process definitions.
#[derive(Debug)]
pub struct ProcessCache {
    entries: DashMap<String, CachedService>,
    capacity: usize,
}

impl ProcessCache {
    /// `capacity` bounds the number of services; 0 disables the cache.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
        }
    }

    /// Cache a process definition. Skipped once the cache is full.
    pub fn register(&self, service: &Service, process: &MonitoredProcess) {
        if let Some(mut entry) = self.entries.get_mut(&service.id) {
            entry.service = service.clone();
            entry.processes.insert(process.id.clone(), process.clone());
            return;
        }
        if self.entries.len() >= self.capacity {
            debug!(service = %service.id, "Process cache full, not caching");
            return;
        }
        self.entries
            .entry(service.id.clone())
            .or_insert_with(|| CachedService {
                service: service.clone(),
                processes: HashMap::new(),
            })
            .processes
            .insert(process.id.clone(), process.clone());
    }

    pub fn lookup(&self, service_id: &str, process_id: &str) -> Option<(Service, MonitoredProcess)> {
        let entry = self.entries.get(service_id)?;
        let process = entry.processes.get(process_id)?.clone();
        Some((entry.service.clone(), process))
    }

    /// Drop every cached process of a service.
    pub fn invalidate(&self, service_id: &str) {
        if self.entries.remove(service_id).is_some() {
            debug!(service = %service_id, "Process cache invalidated");
        }
    }

    pub fn invalidate_process(&self, service_id: &str, process_id: &str) {
        if let Some(mut entry) = self.entries.get_mut(service_id) {
            entry.processes.remove(process_id);
        }
    }

    /// Number of cached services.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ProcessCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixtures(service_id: &str) -> (Service, MonitoredProcess) {
        (
            Service::new(service_id, "http://localhost/wps"),
            MonitoredProcess::new(service_id, "GetCapabilities", "<GetCapabilities/>"),
        )
    }

    #[test]
    fn test_register_and_lookup() {
        let cache = ProcessCache::new(4);
        let (service, process) = fixtures("wps-1");
        cache.register(&service, &process);

        let (cached_service, cached_process) = cache.lookup("wps-1", "GetCapabilities").unwrap();
        assert_eq!(cached_service, service);
        assert_eq!(cached_process, process);
        assert!(cache.lookup("wps-1", "Execute").is_none());
    }

    #[test]
    fn test_capacity_skips_new_services() {
        let cache = ProcessCache::new(1);
        let (a, pa) = fixtures("a");
        let (b, pb) = fixtures("b");
        cache.register(&a, &pa);
        cache.register(&b, &pb);

        assert_eq!(cache.len(), 1);
        assert!(cache.lookup("b", "GetCapabilities").is_none());

        let extra = MonitoredProcess::new("a", "Execute", "<Execute/>");
        cache.register(&a, &extra);
        assert!(cache.lookup("a", "Execute").is_some());
    }

    #[test]
    fn test_invalidation() {
        let cache = ProcessCache::new(4);
        let (service, process) = fixtures("wps-1");
        cache.register(&service, &process);

        cache.invalidate_process("wps-1", "GetCapabilities");
        assert!(cache.lookup("wps-1", "GetCapabilities").is_none());

        cache.register(&service, &process);
        cache.invalidate("wps-1");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_disables_cache() {
        let cache = ProcessCache::new(0);
        let (service, process) = fixtures("wps-1");
        cache.register(&service, &process);
        assert!(cache.is_empty());
    }
}
