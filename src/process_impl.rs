use std::fmt;
use std::io;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crate::config::config;
use crate::join::{make_join_handle, Join, JoinHandle};
use crate::local::{get_process_local, ProcessLocal};
use crate::park::{park, submit};
use crate::preempt::CriticalSection;
use crate::scheduler::{get_scheduler, worker_id};
use crate::timer::{TimerEntry, TimerSlot};
use crate::yield_now::yield_with;
use crossbeam::atomic::AtomicCell;
use generator::{Generator, Gn};
use parking_lot::Mutex;

/// /////////////////////////////////////////////////////////////////////////////
/// Process framework types
/// /////////////////////////////////////////////////////////////////////////////

pub struct EventSubscriber {
    resource: *const dyn EventSource,
}

// the EventSource is either a static or lives on the suspended process
// stack, which stays untouched until the process is resumed again
unsafe impl Send for EventSubscriber {}

impl EventSubscriber {
    pub fn new(r: &(dyn EventSource + 'static)) -> Self {
        EventSubscriber { resource: r }
    }

    pub fn subscribe(self, co: ProcessImpl) {
        let resource = unsafe { &*self.resource };
        resource.subscribe(co);
    }
}

pub trait EventSource {
    /// runs on the worker stack once the process has switched out
    fn subscribe(&self, co: ProcessImpl);
}

/// processes are static generators that yield the event they wait for
pub type ProcessImpl = Generator<'static, (), EventSubscriber>;

#[inline]
#[allow(clippy::cast_ptr_alignment)]
fn get_local(co: &ProcessImpl) -> *mut ProcessLocal {
    co.get_local_data() as *mut ProcessLocal
}

/// the process record attached to a suspended context
#[inline]
pub(crate) fn process_of(co: &ProcessImpl) -> &Process {
    unsafe { &*get_local(co) }.process()
}

/// Lifecycle of a process.
///
/// The netpoll states belong to an I/O readiness poller and are never
/// entered by this crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    None = 0,
    NetpollWaiting = 1,
    NetpollReady = 2,
    NetpollTimeout = 3,
    Runnable = 4,
    Running = 5,
    Blocked = 6,
    Dead = 7,
}

impl From<u8> for Status {
    fn from(v: u8) -> Self {
        match v {
            1 => Status::NetpollWaiting,
            2 => Status::NetpollReady,
            3 => Status::NetpollTimeout,
            4 => Status::Runnable,
            5 => Status::Running,
            6 => Status::Blocked,
            7 => Status::Dead,
            _ => Status::None,
        }
    }
}

/// how the next resume enters the process
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum ResumeKind {
    New = 0,
    Normal = 1,
    Preempted = 2,
}

impl From<u8> for ResumeKind {
    fn from(v: u8) -> Self {
        match v {
            0 => ResumeKind::New,
            2 => ResumeKind::Preempted,
            _ => ResumeKind::Normal,
        }
    }
}

/// /////////////////////////////////////////////////////////////////////////////
/// Process destruction
/// /////////////////////////////////////////////////////////////////////////////

pub struct Done;

impl Done {
    fn drop_process(mut co: ProcessImpl) {
        let local = unsafe { Box::from_raw(get_local(&co)) };
        co.set_local_data(ptr::null_mut());
        let process = local.process();
        process.set_status(Status::Dead);
        local.join().trigger();

        // the last child to exit releases a parent blocked in wait_children
        if let Some(parent) = process.parent() {
            if parent.inner.children.fetch_sub(1, Ordering::AcqRel) == 1 {
                submit(&parent);
            }
        }

        let sched = get_scheduler();
        sched.live.fetch_sub(1, Ordering::AcqRel);
        trace!("process {} exit", process.id());

        let (size, used) = co.stack_usage();
        if used == size {
            error!("stack overflow detected in {:?}, size={}", process, size);
            ::std::process::abort();
        }
        drop(local);

        if size == config().get_stack_size() {
            sched.pool.put(co);
        }
    }
}

impl EventSource for Done {
    fn subscribe(&self, co: ProcessImpl) {
        Self::drop_process(co);
    }
}

/// /////////////////////////////////////////////////////////////////////////////
/// Process
/// /////////////////////////////////////////////////////////////////////////////

/// The internal representation of a `Process` handle
pub(crate) struct Inner {
    id: u64,
    name: Option<String>,
    stack_size: usize,
    born_on: usize,
    pub(crate) status: AtomicU8,
    resume: AtomicU8,
    // the suspended context while the process is blocked
    pub(crate) parked: Mutex<Option<ProcessImpl>>,
    pub(crate) timer: TimerSlot,
    parent: Option<Weak<Inner>>,
    // live children plus one token held by the process itself
    pub(crate) children: AtomicUsize,
    pub(crate) preemptible: AtomicBool,
    pub(crate) critical: AtomicUsize,
}

#[derive(Clone)]
/// A handle to a process.
pub struct Process {
    inner: Arc<Inner>,
}

impl Process {
    // Used only internally to construct a process object without spawning
    fn new(
        name: Option<String>,
        stack_size: usize,
        workers: usize,
        parent: Option<&Process>,
    ) -> Process {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        // spawned from a worker: keep timers local to it, otherwise spread by id
        let born_on = worker_id().unwrap_or(id as usize) % workers.max(1);
        Process {
            inner: Arc::new(Inner {
                id,
                name,
                stack_size,
                born_on,
                status: AtomicU8::new(Status::None as u8),
                resume: AtomicU8::new(ResumeKind::New as u8),
                parked: Mutex::new(None),
                timer: TimerSlot::new(),
                parent: parent.map(|p| Arc::downgrade(&p.inner)),
                children: AtomicUsize::new(1),
                preemptible: AtomicBool::new(false),
                // released by the body on first entry
                critical: AtomicUsize::new(1),
            }),
        }
    }

    /// Gets the unique process id.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Gets the process name.
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Gets the process stack size.
    pub fn stack_size(&self) -> usize {
        self.inner.stack_size
    }

    /// Gets the current scheduling status.
    pub fn status(&self) -> Status {
        Status::from(self.inner.status.load(Ordering::Acquire))
    }

    /// Number of spawned children that have not exited yet.
    pub fn live_children(&self) -> usize {
        self.inner.children.load(Ordering::Acquire).saturating_sub(1)
    }

    #[inline]
    pub(crate) fn inner(&self) -> &Inner {
        &self.inner
    }

    #[inline]
    pub(crate) fn set_status(&self, status: Status) {
        self.inner.status.store(status as u8, Ordering::Release);
    }

    /// the worker whose timer heap serves this process
    #[inline]
    pub(crate) fn born_on(&self) -> usize {
        self.inner.born_on
    }

    pub(crate) fn resume_kind(&self) -> ResumeKind {
        ResumeKind::from(self.inner.resume.load(Ordering::Acquire))
    }

    pub(crate) fn set_resume_kind(&self, kind: ResumeKind) {
        self.inner.resume.store(kind as u8, Ordering::Release);
    }

    fn parent(&self) -> Option<Process> {
        let parent = self.inner.parent.as_ref()?;
        parent.upgrade().map(|inner| Process { inner })
    }
}

impl PartialEq for Process {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Process {}

impl TimerEntry for Process {
    fn timer_slot(&self) -> &TimerSlot {
        &self.inner.timer
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Process")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("status", &self.status())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Builder
////////////////////////////////////////////////////////////////////////////////

/// Process factory, which can be used in order to configure the properties of
/// a new process.
///
/// Methods can be chained on it in order to configure it.
///
/// - [`name`]: specifies an associated name for the process
/// - [`stack_size`]: specifies the desired stack size for the process, in words
///
/// # Examples
///
/// ```
/// use gorun::process;
///
/// let builder = process::Builder::new().name("worker".to_owned());
/// let handler = unsafe { builder.spawn(|| 40 + 2).unwrap() };
///
/// assert_eq!(handler.join().unwrap(), 42);
/// ```
///
/// [`stack_size`]: ./struct.Builder.html#method.stack_size
/// [`name`]: ./struct.Builder.html#method.name
#[derive(Default)]
pub struct Builder {
    // A name for the process-to-be, for identification in logs
    name: Option<String>,
    // The size of the stack for the spawned process
    stack_size: Option<usize>,
    // detached processes are not counted as children of the spawner
    detached: bool,
}

impl Builder {
    /// Generates the base configuration for spawning a process, from which
    /// configuration methods can be chained.
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Names the process-to-be.
    pub fn name(mut self, name: String) -> Builder {
        self.name = Some(name);
        self
    }

    /// Sets the size of the stack for the new process.
    pub fn stack_size(mut self, size: usize) -> Builder {
        self.stack_size = Some(size);
        self
    }

    pub(crate) fn detached(mut self) -> Builder {
        self.detached = true;
        self
    }

    fn spawn_impl<F, T>(self, f: F) -> io::Result<(ProcessImpl, JoinHandle<T>)>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        static DONE: Done = Done;

        let sched = get_scheduler();
        let Builder {
            name,
            stack_size,
            detached,
        } = self;
        let stack_size = stack_size.unwrap_or_else(|| config().get_stack_size());
        let pooled = if stack_size == config().get_stack_size() {
            let co = sched.pool.get();
            co.prefetch();
            Some(co)
        } else {
            None
        };

        // create a join resource, shared by the joiner and the process
        let panic = Arc::new(AtomicCell::new(None));
        let join = Arc::new(Join::new(panic.clone()));
        let packet = Arc::new(AtomicCell::new(None));
        let their_packet = packet.clone();

        let subscriber = EventSubscriber::new(&DONE);

        let closure = move || {
            let body = Body::enter();
            their_packet.swap(Some(f()));
            drop(body);
            subscriber
        };

        let mut co = match pooled {
            Some(mut c) => {
                c.init_code(closure);
                c
            }
            None => Gn::new_opt(stack_size, closure),
        };

        let parent = if detached { None } else { try_current() };
        let handle = Process::new(name, stack_size, sched.workers_len(), parent.as_ref());
        if let Some(parent) = &parent {
            parent.inner.children.fetch_add(1, Ordering::AcqRel);
        }

        // attach the local storage to the process
        let local = ProcessLocal::new(handle.clone(), join.clone());
        co.set_local_data(Box::into_raw(local) as *mut u8);

        sched.live.fetch_add(1, Ordering::AcqRel);
        handle.set_status(Status::Runnable);
        trace!("process {} spawned on worker {}", handle.id(), handle.born_on());

        Ok((co, make_join_handle(handle, join, packet, panic)))
    }

    /// Spawns a new process by taking ownership of the `Builder`, and returns an
    /// `io::Result` to its `JoinHandle`.
    ///
    /// The spawned process may outlive the caller. When the caller is itself a
    /// process, the new one counts as its child for [`wait_children`].
    ///
    /// # Safety
    ///
    ///  - A process may resume on any worker thread, so thread local storage
    ///    read before and after a suspension may belong to different threads.
    ///  - If the process exceeds its stack during execution, this would trigger
    ///    a memory segment fault
    ///
    /// If you find it annoying to wrap every thing in the unsafe block, you can
    /// use the [`go!`] macro instead.
    ///
    /// [`wait_children`]: ./fn.wait_children.html
    /// [`go!`]: ../macro.go.html
    pub unsafe fn spawn<F, T>(self, f: F) -> io::Result<JoinHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let _cs = CriticalSection::enter();
        let (co, handle) = self.spawn_impl(f)?;

        // put the process to ready list
        get_scheduler().schedule(co);

        Ok(handle)
    }
}

/// Marks the user body of a process.
///
/// The body runs preemptible outside of critical sections. Leaving it, by
/// return or by unwinding, re-takes the critical section for the exit path.
struct Body;

impl Body {
    #[inline]
    fn enter() -> Body {
        if let Some(local) = get_process_local() {
            let p = unsafe { local.as_ref() }.process();
            p.set_resume_kind(ResumeKind::Normal);
            p.inner.preemptible.store(true, Ordering::SeqCst);
            p.inner.critical.fetch_sub(1, Ordering::SeqCst);
        }
        Body
    }
}

impl Drop for Body {
    #[inline]
    fn drop(&mut self) {
        if let Some(local) = get_process_local() {
            let p = unsafe { local.as_ref() }.process();
            p.inner.critical.fetch_add(1, Ordering::SeqCst);
            p.inner.preemptible.store(false, Ordering::SeqCst);
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Free functions
////////////////////////////////////////////////////////////////////////////////

/// Spawns a new process, returning a [`JoinHandle`] for it.
///
/// The join handle will implicitly *detach* the child process upon being
/// dropped. If the child process panics, [`join`] will return an `Err`
/// containing the argument given to `panic`.
///
/// # Safety
///
/// See [`Builder::spawn`].
///
/// # Examples
///
/// ```
/// use gorun::process;
///
/// let handler = unsafe {
///     process::spawn(|| {
///         // process code
///     })
/// };
///
/// handler.join().unwrap();
/// ```
///
/// [`JoinHandle`]: struct.JoinHandle.html
/// [`join`]: struct.JoinHandle.html#method.join
/// [`Builder::spawn`]: struct.Builder.html#method.spawn
pub unsafe fn spawn<F, T>(f: F) -> JoinHandle<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match Builder::new().spawn(f) {
        Ok(h) => h,
        Err(e) => panic!("failed to spawn process: {}", e),
    }
}

/// spawn a runtime helper that is nobody's child
pub(crate) fn spawn_detached<F, T>(f: F) -> JoinHandle<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match unsafe { Builder::new().detached().spawn(f) } {
        Ok(h) => h,
        Err(e) => panic!("failed to spawn runtime process: {}", e),
    }
}

/// Gets a handle to the process that invokes it.
/// it will panic if you call it in a thread context
#[inline]
pub fn current() -> Process {
    match try_current() {
        Some(p) => p,
        None => panic!("no current process, did you call `current()` in thread context?"),
    }
}

#[inline]
pub(crate) fn try_current() -> Option<Process> {
    get_process_local().map(|local| unsafe { local.as_ref() }.process().clone())
}

struct WaitChildren;

impl EventSource for WaitChildren {
    fn subscribe(&self, co: ProcessImpl) {
        let process = process_of(&co).clone();
        park(&process, co);
        // give up the self token only once parked, so the last exit wakes us
        if process.inner.children.fetch_sub(1, Ordering::AcqRel) == 1 {
            submit(&process);
        }
    }
}

/// Blocks the current process until every process it spawned has exited.
///
/// Detached runtime helpers are not counted. In a thread context this
/// returns at once.
pub fn wait_children() {
    let process = match try_current() {
        Some(p) => p,
        None => return,
    };
    let _cs = CriticalSection::enter();
    let children = &process.inner.children;
    while children.load(Ordering::Acquire) != 1 {
        yield_with(&WaitChildren);
        children.fetch_add(1, Ordering::AcqRel);
    }
}

/// if current context is a process
#[inline]
pub fn is_process() -> bool {
    get_process_local().is_some()
}

/// run the process until it switches out, then hand it to the event it waits for
#[inline]
pub(crate) fn run_process(mut co: ProcessImpl) {
    trace!(
        "resume process {} ({:?})",
        process_of(&co).id(),
        process_of(&co).resume_kind()
    );
    match co.resume() {
        Some(ev) => ev.subscribe(co),
        None => {
            // panic happened here
            let local = unsafe { &*get_local(&co) };
            if let Some(panic) = co.get_panic_data() {
                let msg = panic
                    .downcast_ref::<&str>()
                    .copied()
                    .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
                    .unwrap_or("Box<dyn Any>");
                error!("{:?} panicked: {}", local.process(), msg);
                local.join().set_panic_data(panic);
            }
            Done::drop_process(co);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic;

    #[test]
    fn unwinding_body_retakes_critical_section() {
        let h = go!(|| {
            let me = current();
            let inner = me.inner();
            let _cs = CriticalSection::enter();
            let r = panic::catch_unwind(|| {
                let _body = Body::enter();
                panic!("unwind through the body");
            });
            let state = (
                r.is_err(),
                inner.critical.load(Ordering::SeqCst),
                inner.preemptible.load(Ordering::SeqCst),
            );
            inner.preemptible.store(true, Ordering::SeqCst);
            state
        });
        assert_eq!(h.join().unwrap(), (true, 1, false));
    }

    #[test]
    fn body_releases_the_initial_section() {
        let h = go!(|| {
            let me = current();
            (
                me.inner().critical.load(Ordering::SeqCst),
                me.inner().preemptible.load(Ordering::SeqCst),
            )
        });
        assert_eq!(h.join().unwrap(), (0, true));
    }

    #[test]
    fn panicking_process_exits_cleanly() {
        let h = go!(|| {
            let _cs = CriticalSection::enter();
            panic!("fail inside a critical section");
        });
        assert!(h.join().is_err());
        assert_eq!(go!(|| 3).join().unwrap(), 3);
    }
}
