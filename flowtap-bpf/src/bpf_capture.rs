//! libbpf-backed capture program.
//!
//! `BpfCapture` loads a compiled BPF object, attaches its XDP program and
//! reads the event perf buffer and the per-source counter map. Only available
//! when the `bpf` feature is enabled.

#![cfg(feature = "bpf")]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use libbpf_rs::{Link, MapCore, MapFlags, MapHandle, Object, ObjectBuilder, PerfBuffer, PerfBufferBuilder};

use crate::capture::{AttachError, CaptureError, CaptureProgram};

/// Perf event map the XDP program submits packet records to.
pub const EVENTS_MAP: &str = "packet_events";

/// Hash map of cumulative packet counts keyed by IPv4 source address.
pub const COUNTS_MAP: &str = "packet_count";

/// Capture program backed by a loaded BPF object.
///
/// Dropping the value drops the XDP link, which detaches the program from the
/// interface.
pub struct BpfCapture {
    // Field order matters: the perf buffer and link go before the object.
    perf: Option<PerfBuffer<'static>>,
    link: Option<Link>,
    pending: Rc<RefCell<Vec<Vec<u8>>>>,
    lost: Rc<Cell<u64>>,
    events: MapHandle,
    counts: MapHandle,
    object: Object,
    interface: Option<String>,
}

impl BpfCapture {
    /// Open and load the BPF object at `path`.
    ///
    /// # Errors
    /// Returns `AttachError::Load` when the object cannot be opened or the
    /// verifier rejects it, and `AttachError::MapNotFound` when either map
    /// is missing.
    pub fn load(path: &Path) -> Result<Self, AttachError> {
        let object = ObjectBuilder::default()
            .open_file(path)
            .map_err(|e| AttachError::Load(format!("{}: {e}", path.display())))?
            .load()
            .map_err(|e| AttachError::Load(format!("{}: {e}", path.display())))?;

        let events = find_map(&object, EVENTS_MAP)?;
        let counts = find_map(&object, COUNTS_MAP)?;

        Ok(Self {
            perf: None,
            link: None,
            pending: Rc::new(RefCell::new(Vec::new())),
            lost: Rc::new(Cell::new(0)),
            events,
            counts,
            object,
            interface: None,
        })
    }

    /// Interface the program is attached to, if any.
    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }
}

fn find_map(object: &Object, name: &str) -> Result<MapHandle, AttachError> {
    let map = object
        .maps()
        .find(|m| m.name() == name)
        .ok_or_else(|| AttachError::MapNotFound(name.to_string()))?;
    MapHandle::try_from(&map).map_err(|e| AttachError::Load(format!("map '{name}': {e}")))
}

fn classify_attach_error(interface: &str, err: libbpf_rs::Error) -> AttachError {
    let reason = err.to_string();
    if reason.contains("permission") || reason.contains("EPERM") {
        AttachError::InsufficientPermissions
    } else {
        AttachError::Attach {
            interface: interface.to_string(),
            reason,
        }
    }
}

impl CaptureProgram for BpfCapture {
    fn attach(&mut self, interface: &str, program: &str) -> Result<(), AttachError> {
        if let Some(current) = &self.interface {
            return Err(AttachError::AlreadyAttached(current.clone()));
        }

        let ifindex = nix::net::if_::if_nametoindex(interface)
            .map_err(|_| AttachError::InterfaceNotFound(interface.to_string()))?;

        let link = {
            let prog = self
                .object
                .progs_mut()
                .find(|p| p.name() == program)
                .ok_or_else(|| AttachError::ProgramNotFound(program.to_string()))?;
            prog.attach_xdp(ifindex as i32)
                .map_err(|e| classify_attach_error(interface, e))?
        };

        let pending = Rc::clone(&self.pending);
        let lost = Rc::clone(&self.lost);
        let perf = PerfBufferBuilder::new(&self.events)
            .sample_cb(move |_cpu: i32, data: &[u8]| {
                pending.borrow_mut().push(data.to_vec());
            })
            .lost_cb(move |_cpu: i32, count: u64| {
                lost.set(lost.get().saturating_add(count));
            })
            .build()
            .map_err(|e| AttachError::Load(format!("perf buffer '{EVENTS_MAP}': {e}")))?;

        self.perf = Some(perf);
        self.link = Some(link);
        self.interface = Some(interface.to_string());
        Ok(())
    }

    fn poll_records(&mut self, timeout: Duration) -> Result<Vec<Vec<u8>>, CaptureError> {
        let perf = self.perf.as_ref().ok_or(CaptureError::NotAttached)?;
        perf.poll(timeout)
            .map_err(|e| CaptureError::Read(e.to_string()))?;
        Ok(std::mem::take(&mut *self.pending.borrow_mut()))
    }

    fn read_counters(&self) -> Result<HashMap<Ipv4Addr, u64>, CaptureError> {
        if self.interface.is_none() {
            return Err(CaptureError::NotAttached);
        }

        let mut result = HashMap::new();
        for key in self.counts.keys() {
            let key_bytes: [u8; 4] = key
                .as_slice()
                .try_into()
                .map_err(|_| CaptureError::Read("invalid key size".to_string()))?;

            let value = self
                .counts
                .lookup(&key, MapFlags::ANY)
                .map_err(|e| CaptureError::Read(e.to_string()))?;

            // Entries deleted between keys() and lookup() are skipped.
            if let Some(value) = value {
                let value_bytes: [u8; 8] = value
                    .get(..8)
                    .and_then(|b| b.try_into().ok())
                    .ok_or_else(|| CaptureError::Read("invalid value size".to_string()))?;
                result.insert(Ipv4Addr::from(key_bytes), u64::from_ne_bytes(value_bytes));
            }
        }
        Ok(result)
    }

    fn clear_counters(&mut self) -> Result<(), CaptureError> {
        if self.interface.is_none() {
            return Err(CaptureError::NotAttached);
        }
        let keys: Vec<Vec<u8>> = self.counts.keys().collect();
        for key in keys {
            self.counts
                .delete(&key)
                .map_err(|e| CaptureError::Read(e.to_string()))?;
        }
        Ok(())
    }

    fn detach(&mut self) -> Result<(), CaptureError> {
        if self.interface.take().is_none() {
            return Err(CaptureError::NotAttached);
        }
        self.perf = None;
        if let Some(link) = self.link.take() {
            link.detach()
                .map_err(|e| CaptureError::Detach(e.to_string()))?;
        }
        Ok(())
    }

    fn lost_events(&self) -> u64 {
        self.lost.get()
    }
}
