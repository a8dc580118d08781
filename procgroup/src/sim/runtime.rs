use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use super::element::{self, Element};
use super::tensor::SimTensor;
use crate::device::DeviceRuntime;
use crate::error::{ProcessGroupError, Result};
use crate::types::{DeviceIndex, EventFlags, EventHandle, ScalarType, StreamHandle};

/// Unit of work executed in order by a stream worker.
pub(crate) type Task = Box<dyn FnOnce() -> Result<()> + Send>;

const BLOCK_ALIGN: u64 = 256;

// ── Memory ─────────────────────────────────────────────────────────────

struct Block {
    device: Option<DeviceIndex>,
    bytes: Vec<u8>,
}

/// Address-keyed memory shared by a runtime, its tensors and the work queued
/// on its streams.
pub(crate) struct SimMemory {
    blocks: Mutex<BTreeMap<u64, Block>>,
    next_addr: AtomicU64,
    allocator: Mutex<()>,
}

impl SimMemory {
    fn new() -> Self {
        Self {
            blocks: Mutex::new(BTreeMap::new()),
            next_addr: AtomicU64::new(0x7f00_0000_0000),
            allocator: Mutex::new(()),
        }
    }

    pub(crate) fn alloc(&self, device: Option<DeviceIndex>, len: usize) -> Result<u64> {
        // One alignment unit of padding keeps neighbouring blocks apart.
        let span = (len as u64).max(1).next_multiple_of(BLOCK_ALIGN) + BLOCK_ALIGN;
        let addr = self.next_addr.fetch_add(span, Ordering::Relaxed);
        self.lock_blocks()?.insert(
            addr,
            Block {
                device,
                bytes: vec![0; len],
            },
        );
        Ok(addr)
    }

    /// Release a block. Serialized against collective issuance through the
    /// allocator mutex.
    pub(crate) fn free(&self, addr: u64) {
        let _alloc = self.allocator.lock().unwrap_or_else(PoisonError::into_inner);
        match self.blocks.lock() {
            Ok(mut blocks) => {
                blocks.remove(&addr);
            }
            Err(_) => tracing::warn!(addr, "sim memory lock poisoned on free"),
        }
    }

    pub(crate) fn read(&self, ptr: u64, len: usize) -> Result<Vec<u8>> {
        let blocks = self.lock_blocks()?;
        let (block, offset) = locate(&blocks, ptr, len)?;
        Ok(block.bytes[offset..offset + len].to_vec())
    }

    pub(crate) fn write(&self, ptr: u64, data: &[u8]) -> Result<()> {
        let mut blocks = self.lock_blocks()?;
        let (base, offset) = {
            let (_, offset) = locate(&blocks, ptr, data.len())?;
            (ptr - offset as u64, offset)
        };
        let block = blocks
            .get_mut(&base)
            .ok_or_else(|| ProcessGroupError::device(format!("invalid device address {ptr:#x}")))?;
        block.bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn device_of(&self, ptr: u64) -> Result<Option<DeviceIndex>> {
        let blocks = self.lock_blocks()?;
        Ok(locate(&blocks, ptr, 0)?.0.device)
    }

    fn live_blocks(&self) -> usize {
        self.blocks.lock().map(|b| b.len()).unwrap_or(0)
    }

    fn lock_blocks(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<u64, Block>>> {
        self.blocks
            .lock()
            .map_err(|_| ProcessGroupError::LockPoisoned("sim memory"))
    }
}

fn locate(blocks: &BTreeMap<u64, Block>, ptr: u64, len: usize) -> Result<(&Block, usize)> {
    let out_of_range = || {
        ProcessGroupError::device(format!(
            "illegal address: {len} bytes at {ptr:#x} are not inside one allocation"
        ))
    };
    let (&base, block) = blocks.range(..=ptr).next_back().ok_or_else(out_of_range)?;
    let offset = (ptr - base) as usize;
    if offset + len > block.bytes.len() {
        return Err(out_of_range());
    }
    Ok((block, offset))
}

// ── Streams ────────────────────────────────────────────────────────────

struct SimStream {
    device: DeviceIndex,
    queue: mpsc::Sender<Task>,
    /// First error raised by a task on this stream. Sticky.
    fault: Arc<Mutex<Option<String>>>,
}

impl SimStream {
    fn spawn(id: u64, device: DeviceIndex) -> Result<Self> {
        let (queue, tasks) = mpsc::channel::<Task>();
        let fault = Arc::new(Mutex::new(None));
        let worker_fault = Arc::clone(&fault);
        thread::Builder::new()
            .name(format!("sim-stream-{id}"))
            .spawn(move || {
                for task in tasks {
                    if let Err(e) = task() {
                        tracing::debug!(stream = id, "stream task failed: {e}");
                        let mut fault = worker_fault.lock().unwrap_or_else(PoisonError::into_inner);
                        fault.get_or_insert_with(|| e.to_string());
                    }
                }
            })
            .map_err(|e| ProcessGroupError::device_with_source("failed to spawn stream worker", e))?;
        Ok(Self {
            device,
            queue,
            fault,
        })
    }
}

fn read_fault(fault: &Mutex<Option<String>>) -> Option<String> {
    fault.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

// ── Events ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct EventState {
    /// Number of times the event has been recorded.
    recorded: u64,
    /// Highest record whose captured work has retired.
    completed: u64,
    fault: Option<String>,
}

struct SimEvent {
    device: DeviceIndex,
    flags: EventFlags,
    state: Mutex<EventState>,
    signal: Condvar,
}

impl SimEvent {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, EventState>> {
        self.state
            .lock()
            .map_err(|_| ProcessGroupError::LockPoisoned("sim event"))
    }

    fn complete(&self, target: u64, fault: Option<String>) -> Result<()> {
        let mut state = self.lock()?;
        state.completed = state.completed.max(target);
        if fault.is_some() {
            state.fault = fault;
        }
        self.signal.notify_all();
        Ok(())
    }

    /// Block until record number `target` has retired.
    fn wait_for(&self, target: u64) -> Result<()> {
        let mut state = self.lock()?;
        while state.completed < target {
            state = self
                .signal
                .wait(state)
                .map_err(|_| ProcessGroupError::LockPoisoned("sim event"))?;
        }
        match &state.fault {
            Some(fault) => Err(ProcessGroupError::device(fault.clone())),
            None => Ok(()),
        }
    }
}

// ── Gate ───────────────────────────────────────────────────────────────

/// Holds a stream at the point it was inserted until opened or dropped.
pub struct SimGate {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl SimGate {
    pub fn open(&self) {
        let (lock, cv) = &*self.state;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cv.notify_all();
    }
}

impl Drop for SimGate {
    fn drop(&mut self) {
        self.open();
    }
}

// ── Runtime ────────────────────────────────────────────────────────────

/// In-process device runtime with `device_count` simulated devices.
///
/// Every stream is a worker thread draining a FIFO queue, so enqueueing
/// returns immediately and work retires asynchronously, in order. Events
/// follow record/query/wait semantics of a real driver: a query reports the
/// most recent record, and a stream wait captures the record current at
/// call time. A failing task poisons its stream; the failure is reported by
/// later queries and synchronizations that observe it.
///
/// Use one `SimRuntime` per simulated process.
pub struct SimRuntime {
    device_count: usize,
    next_handle: AtomicU64,
    streams: Mutex<HashMap<u64, SimStream>>,
    events: Mutex<HashMap<u64, Arc<SimEvent>>>,
    current_device: Mutex<HashMap<ThreadId, DeviceIndex>>,
    current_streams: Mutex<HashMap<DeviceIndex, StreamHandle>>,
    memory: Arc<SimMemory>,
    events_recorded: AtomicUsize,
}

impl SimRuntime {
    pub fn new(device_count: usize) -> Arc<Self> {
        Arc::new(Self {
            device_count,
            next_handle: AtomicU64::new(1),
            streams: Mutex::new(HashMap::new()),
            events: Mutex::new(HashMap::new()),
            current_device: Mutex::new(HashMap::new()),
            current_streams: Mutex::new(HashMap::new()),
            memory: Arc::new(SimMemory::new()),
            events_recorded: AtomicUsize::new(0),
        })
    }

    pub(crate) fn memory(&self) -> Arc<SimMemory> {
        Arc::clone(&self.memory)
    }

    fn check_device(&self, device: DeviceIndex) -> Result<()> {
        if device >= self.device_count {
            return Err(ProcessGroupError::device(format!(
                "invalid device ordinal {device}: {} devices visible",
                self.device_count
            )));
        }
        Ok(())
    }

    fn next_handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    fn event(&self, event: EventHandle) -> Result<Arc<SimEvent>> {
        self.events
            .lock()
            .map_err(|_| ProcessGroupError::LockPoisoned("sim events"))?
            .get(&event.0)
            .cloned()
            .ok_or_else(|| ProcessGroupError::device(format!("unknown event {}", event.0)))
    }

    fn stream_parts(
        &self,
        stream: StreamHandle,
    ) -> Result<(mpsc::Sender<Task>, Arc<Mutex<Option<String>>>)> {
        let streams = self
            .streams
            .lock()
            .map_err(|_| ProcessGroupError::LockPoisoned("sim streams"))?;
        let s = streams
            .get(&stream.0)
            .ok_or_else(|| ProcessGroupError::device(format!("unknown stream {}", stream.0)))?;
        Ok((s.queue.clone(), Arc::clone(&s.fault)))
    }

    /// Queue `task` behind everything already on `stream`.
    pub(crate) fn enqueue(&self, stream: StreamHandle, task: Task) -> Result<()> {
        let (queue, _) = self.stream_parts(stream)?;
        queue
            .send(task)
            .map_err(|_| ProcessGroupError::device(format!("stream {} worker has exited", stream.0)))
    }

    /// Queue an arbitrary host closure as device work on `stream`.
    pub fn launch<F>(&self, stream: StreamHandle, work: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.enqueue(stream, Box::new(work))
    }

    /// Queue a kernel that occupies `stream` for `duration`.
    pub fn delay_stream(&self, stream: StreamHandle, duration: Duration) -> Result<()> {
        self.launch(stream, move || {
            thread::sleep(duration);
            Ok(())
        })
    }

    /// Hold `stream` at its current tail until the returned gate opens.
    pub fn gate_stream(&self, stream: StreamHandle) -> Result<SimGate> {
        let state = Arc::new((Mutex::new(false), Condvar::new()));
        let held = Arc::clone(&state);
        self.launch(stream, move || {
            let (lock, cv) = &*held;
            let mut open = lock.lock().unwrap_or_else(PoisonError::into_inner);
            while !*open {
                open = cv.wait(open).unwrap_or_else(PoisonError::into_inner);
            }
            Ok(())
        })?;
        Ok(SimGate { state })
    }

    /// Queue a kernel that fails with `message`, poisoning `stream`.
    pub fn fail_stream(&self, stream: StreamHandle, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        self.launch(stream, move || Err(ProcessGroupError::device(message)))
    }

    /// Make `stream` the current compute stream of its device.
    pub fn set_current_stream(&self, stream: StreamHandle) -> Result<()> {
        let device = {
            let streams = self
                .streams
                .lock()
                .map_err(|_| ProcessGroupError::LockPoisoned("sim streams"))?;
            streams
                .get(&stream.0)
                .map(|s| s.device)
                .ok_or_else(|| ProcessGroupError::device(format!("unknown stream {}", stream.0)))?
        };
        self.current_streams
            .lock()
            .map_err(|_| ProcessGroupError::LockPoisoned("sim current streams"))?
            .insert(device, stream);
        Ok(())
    }

    // ── Tensors ──

    /// Zero-filled tensor on `device`.
    pub fn alloc(&self, device: DeviceIndex, scalar_type: ScalarType, numel: usize) -> Result<SimTensor> {
        self.check_device(device)?;
        let ptr = self
            .memory
            .alloc(Some(device), numel * scalar_type.size_in_bytes())?;
        Ok(SimTensor::new(self.memory(), ptr, Some(device), scalar_type, numel))
    }

    /// Tensor on `device` holding `values`.
    pub fn tensor<T: Element>(&self, device: DeviceIndex, values: &[T]) -> Result<SimTensor> {
        let tensor = self.alloc(device, T::SCALAR_TYPE, values.len())?;
        self.memory.write(tensor.ptr(), &element::encode(values))?;
        Ok(tensor)
    }

    /// Tensor in host memory holding `values`.
    pub fn host_tensor<T: Element>(&self, values: &[T]) -> Result<SimTensor> {
        let bytes = element::encode(values);
        let ptr = self.memory.alloc(None, bytes.len())?;
        self.memory.write(ptr, &bytes)?;
        Ok(SimTensor::new(self.memory(), ptr, None, T::SCALAR_TYPE, values.len()))
    }

    /// Read a tensor's contents now, without waiting for queued work.
    pub fn download<T: Element>(&self, tensor: &SimTensor) -> Result<Vec<T>> {
        if T::SCALAR_TYPE != tensor.scalar_type {
            return Err(ProcessGroupError::device(format!(
                "cannot read {} tensor as {}",
                tensor.scalar_type,
                T::SCALAR_TYPE
            )));
        }
        let bytes = self.memory.read(tensor.ptr(), tensor.byte_len())?;
        Ok(element::decode(&bytes))
    }

    /// Queue a write of `values` into `tensor` on `stream`.
    pub fn write_on_stream<T: Element>(
        &self,
        stream: StreamHandle,
        tensor: &SimTensor,
        values: &[T],
    ) -> Result<()> {
        if values.len() != tensor.numel || T::SCALAR_TYPE != tensor.scalar_type {
            return Err(ProcessGroupError::device("write does not match tensor shape"));
        }
        let memory = self.memory();
        let ptr = tensor.ptr();
        let bytes = element::encode(values);
        self.launch(stream, move || memory.write(ptr, &bytes))
    }

    /// Device an address belongs to, `None` for host memory.
    pub fn device_of(&self, ptr: u64) -> Result<Option<DeviceIndex>> {
        self.memory.device_of(ptr)
    }

    // ── Instrumentation ──

    /// Total `record_event` calls made against this runtime.
    pub fn events_recorded(&self) -> usize {
        self.events_recorded.load(Ordering::SeqCst)
    }

    pub fn live_streams(&self) -> usize {
        self.streams.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn live_events(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn live_allocations(&self) -> usize {
        self.memory.live_blocks()
    }

    pub fn event_flags(&self, event: EventHandle) -> Option<EventFlags> {
        self.event(event).ok().map(|e| e.flags)
    }

    pub fn event_device(&self, event: EventHandle) -> Option<DeviceIndex> {
        self.event(event).ok().map(|e| e.device)
    }
}

impl DeviceRuntime for SimRuntime {
    fn device_count(&self) -> usize {
        self.device_count
    }

    fn current_device(&self) -> Result<DeviceIndex> {
        let current = self
            .current_device
            .lock()
            .map_err(|_| ProcessGroupError::LockPoisoned("sim current device"))?;
        Ok(current.get(&thread::current().id()).copied().unwrap_or(0))
    }

    fn set_device(&self, device: DeviceIndex) -> Result<()> {
        self.check_device(device)?;
        self.current_device
            .lock()
            .map_err(|_| ProcessGroupError::LockPoisoned("sim current device"))?
            .insert(thread::current().id(), device);
        Ok(())
    }

    fn current_stream(&self, device: DeviceIndex) -> Result<StreamHandle> {
        self.check_device(device)?;
        let mut current = self
            .current_streams
            .lock()
            .map_err(|_| ProcessGroupError::LockPoisoned("sim current streams"))?;
        if let Some(&stream) = current.get(&device) {
            return Ok(stream);
        }
        let stream = self.create_stream(device)?;
        current.insert(device, stream);
        Ok(stream)
    }

    fn create_stream(&self, device: DeviceIndex) -> Result<StreamHandle> {
        self.check_device(device)?;
        let id = self.next_handle();
        let stream = SimStream::spawn(id, device)?;
        self.streams
            .lock()
            .map_err(|_| ProcessGroupError::LockPoisoned("sim streams"))?
            .insert(id, stream);
        Ok(StreamHandle(id))
    }

    fn destroy_stream(&self, stream: StreamHandle) -> Result<()> {
        // Dropping the queue lets the worker drain what is left and exit.
        self.streams
            .lock()
            .map_err(|_| ProcessGroupError::LockPoisoned("sim streams"))?
            .remove(&stream.0)
            .map(drop)
            .ok_or_else(|| ProcessGroupError::device(format!("unknown stream {}", stream.0)))
    }

    fn create_event(&self, device: DeviceIndex, flags: EventFlags) -> Result<EventHandle> {
        self.check_device(device)?;
        let id = self.next_handle();
        let event = Arc::new(SimEvent {
            device,
            flags,
            state: Mutex::new(EventState::default()),
            signal: Condvar::new(),
        });
        self.events
            .lock()
            .map_err(|_| ProcessGroupError::LockPoisoned("sim events"))?
            .insert(id, event);
        Ok(EventHandle(id))
    }

    fn destroy_event(&self, event: EventHandle) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| ProcessGroupError::LockPoisoned("sim events"))?
            .remove(&event.0)
            .map(drop)
            .ok_or_else(|| ProcessGroupError::device(format!("unknown event {}", event.0)))
    }

    fn record_event(&self, event: EventHandle, stream: StreamHandle) -> Result<()> {
        let ev = self.event(event)?;
        let (queue, fault) = self.stream_parts(stream)?;

        let mut state = ev.lock()?;
        state.recorded += 1;
        let target = state.recorded;
        let marker = Arc::clone(&ev);
        let sent = queue.send(Box::new(move || marker.complete(target, read_fault(&fault))));
        if sent.is_err() {
            state.recorded -= 1;
            return Err(ProcessGroupError::device(format!(
                "stream {} worker has exited",
                stream.0
            )));
        }
        drop(state);

        self.events_recorded.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn query_event(&self, event: EventHandle) -> Result<bool> {
        let ev = self.event(event)?;
        let state = ev.lock()?;
        if let Some(fault) = &state.fault {
            return Err(ProcessGroupError::device(fault.clone()));
        }
        Ok(state.completed >= state.recorded)
    }

    fn stream_wait_event(&self, stream: StreamHandle, event: EventHandle) -> Result<()> {
        let ev = self.event(event)?;
        let target = ev.lock()?.recorded;
        if target == 0 {
            return Ok(());
        }
        self.enqueue(stream, Box::new(move || ev.wait_for(target)))
    }

    fn synchronize_event(&self, event: EventHandle) -> Result<()> {
        let ev = self.event(event)?;
        let target = ev.lock()?.recorded;
        ev.wait_for(target)
    }

    fn synchronize_stream(&self, stream: StreamHandle) -> Result<()> {
        let (done_tx, done_rx) = mpsc::channel();
        let (queue, fault) = self.stream_parts(stream)?;
        queue
            .send(Box::new(move || {
                let _ = done_tx.send(());
                Ok(())
            }))
            .map_err(|_| ProcessGroupError::device(format!("stream {} worker has exited", stream.0)))?;
        done_rx
            .recv()
            .map_err(|_| ProcessGroupError::device(format!("stream {} worker has exited", stream.0)))?;
        match read_fault(&fault) {
            Some(fault) => Err(ProcessGroupError::device(fault)),
            None => Ok(()),
        }
    }

    fn allocator_mutex(&self) -> &Mutex<()> {
        &self.memory.allocator
    }
}
