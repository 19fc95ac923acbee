//! The shared job table: a fixed-capacity record store in POSIX shared
//! memory, protected by a process-shared semaphore.
//!
//! The shell creates and destroys the region exactly once per session; the
//! external scheduler attaches to it by name; the completion tracker reaches
//! it from signal context through a raw pointer published at install time.
//! Every access path takes the guard first and holds it across the touch,
//! with no nested acquisition.

pub mod record;

use std::io;
use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::num::NonZeroUsize;
use std::os::fd::AsRawFd;
use std::ptr::{addr_of_mut, NonNull};
use std::slice;

use nix::fcntl::OFlag;
use nix::sys::mman::{mmap, munmap, shm_open, shm_unlink, MapFlags, ProtFlags};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;

use crate::error::{Result, ShellError};
pub use record::{elapsed_ms, now_us, JobRecord, MAX_COMMAND_BYTES, MAX_PRIORITY, MIN_PRIORITY};

/// Fixed header at the start of the shared region. The records follow it,
/// aligned to `JobRecord`.
#[repr(C)]
pub struct TableHeader {
    mutex: libc::sem_t,
    count: u32,
    capacity: u32,
    ncpu: u32,
    tslice_ms: u32,
}

fn records_offset() -> usize {
    let align = align_of::<JobRecord>();
    (size_of::<TableHeader>() + align - 1) & !(align - 1)
}

fn region_len(capacity: u32) -> usize {
    records_offset() + capacity as usize * size_of::<JobRecord>()
}

/// Handle to the shared job table.
///
/// The creating handle owns the backing object: dropping it destroys the
/// semaphore and unlinks the region. Attached handles only unmap.
pub struct SharedTable {
    header: NonNull<TableHeader>,
    len: usize,
    name: String,
    owner: bool,
}

impl SharedTable {
    /// Allocate and initialize a fresh table. Fails with a `Resource` error
    /// if the object already exists or the size negotiation fails.
    pub fn create(name: &str, capacity: u32, ncpu: u32, tslice_ms: u32) -> Result<Self> {
        if capacity == 0 {
            return Err(ShellError::Resource("table capacity must be positive".into()));
        }
        let fd = shm_open(
            name,
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )
        .map_err(|e| ShellError::Resource(format!("shm_open({name}): {e}")))?;

        let len = region_len(capacity);
        if let Err(e) = ftruncate(&fd, len as libc::off_t) {
            let _ = shm_unlink(name);
            return Err(ShellError::Resource(format!("ftruncate({name}): {e}")));
        }
        let header = match map_region(&fd, len) {
            Ok(ptr) => ptr,
            Err(e) => {
                let _ = shm_unlink(name);
                return Err(e);
            }
        };

        unsafe {
            let h = header.as_ptr();
            (*h).count = 0;
            (*h).capacity = capacity;
            (*h).ncpu = ncpu;
            (*h).tslice_ms = tslice_ms;
            if libc::sem_init(addr_of_mut!((*h).mutex), 1, 1) == -1 {
                let err = io::Error::last_os_error();
                let _ = munmap(header.cast(), len);
                let _ = shm_unlink(name);
                return Err(ShellError::Resource(format!("sem_init: {err}")));
            }
        }

        tracing::info!(name, capacity, ncpu, tslice_ms, "Shared job table created");
        Ok(Self {
            header,
            len,
            name: name.to_string(),
            owner: true,
        })
    }

    /// Attach to a table created by another process. This is the scheduler
    /// side of the handoff contract.
    pub fn attach(name: &str) -> Result<Self> {
        let fd = shm_open(name, OFlag::O_RDWR, Mode::empty())
            .map_err(|e| ShellError::Resource(format!("shm_open({name}): {e}")))?;

        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(fd.as_raw_fd(), &mut st) } == -1 {
            return Err(ShellError::Resource(format!(
                "fstat({name}): {}",
                io::Error::last_os_error()
            )));
        }
        let len = st.st_size as usize;
        if len < region_len(1) {
            return Err(ShellError::Resource(format!(
                "shared region {name} too small ({len} bytes)"
            )));
        }
        let header = map_region(&fd, len)?;

        let capacity = unsafe { (*header.as_ptr()).capacity };
        if region_len(capacity) > len {
            unsafe {
                let _ = munmap(header.cast(), len);
            }
            return Err(ShellError::Resource(format!(
                "shared region {name} shorter than its declared capacity"
            )));
        }

        Ok(Self {
            header,
            len,
            name: name.to_string(),
            owner: false,
        })
    }

    /// Acquire the cross-process guard, run `f` against the table, release.
    /// The release happens on every exit path, panics included.
    pub fn with_guard<T>(&self, f: impl FnOnce(&mut TableView<'_>) -> T) -> Result<T> {
        let sem = unsafe { addr_of_mut!((*self.header.as_ptr()).mutex) };
        loop {
            if unsafe { libc::sem_wait(sem) } == 0 {
                break;
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                return Err(ShellError::Sync(format!("sem_wait: {err}")));
            }
        }
        let _release = SemRelease(sem);
        let mut view = TableView {
            header: self.header.as_ptr(),
            _marker: PhantomData,
        };
        Ok(f(&mut view))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw header pointer for the completion tracker. The pointer stays
    /// valid until this handle is dropped; the tracker must be disarmed
    /// first.
    pub(crate) fn header_ptr(&self) -> *mut TableHeader {
        self.header.as_ptr()
    }
}

impl Drop for SharedTable {
    fn drop(&mut self) {
        unsafe {
            if self.owner {
                libc::sem_destroy(addr_of_mut!((*self.header.as_ptr()).mutex));
            }
            let _ = munmap(self.header.cast(), self.len);
        }
        if self.owner {
            let _ = shm_unlink(self.name.as_str());
            tracing::info!(name = %self.name, "Shared job table destroyed");
        }
    }
}

struct SemRelease(*mut libc::sem_t);

impl Drop for SemRelease {
    fn drop(&mut self) {
        unsafe {
            libc::sem_post(self.0);
        }
    }
}

fn map_region<F: std::os::fd::AsFd>(fd: &F, len: usize) -> Result<NonNull<TableHeader>> {
    let nz = NonZeroUsize::new(len)
        .ok_or_else(|| ShellError::Resource("empty shared region".into()))?;
    let ptr = unsafe {
        mmap(
            None,
            nz,
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
            MapFlags::MAP_SHARED,
            fd,
            0,
        )
    }
    .map_err(|e| ShellError::Resource(format!("mmap: {e}")))?;
    Ok(ptr.cast())
}

/// Guarded view of the table. Only obtainable through
/// [`SharedTable::with_guard`], so holding one implies holding the guard.
pub struct TableView<'a> {
    header: *mut TableHeader,
    _marker: PhantomData<&'a mut TableHeader>,
}

impl TableView<'_> {
    fn header(&self) -> &TableHeader {
        unsafe { &*self.header }
    }

    fn records_ptr(&self) -> *mut JobRecord {
        unsafe { (self.header as *mut u8).add(records_offset()) as *mut JobRecord }
    }

    pub fn len(&self) -> usize {
        self.header().count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> u32 {
        self.header().capacity
    }

    pub fn ncpu(&self) -> u32 {
        self.header().ncpu
    }

    pub fn tslice_ms(&self) -> u32 {
        self.header().tslice_ms
    }

    /// Append one fully-initialized record. Rejected when the table is at
    /// capacity; the caller must not have created a process for the command
    /// yet.
    pub fn append(&mut self, record: JobRecord) -> Result<usize> {
        let count = self.header().count;
        if count == self.header().capacity {
            return Err(ShellError::TableFull(self.header().capacity));
        }
        unsafe {
            self.records_ptr().add(count as usize).write(record);
            (*self.header).count = count + 1;
        }
        Ok(count as usize)
    }

    pub fn records(&self) -> &[JobRecord] {
        unsafe { slice::from_raw_parts(self.records_ptr(), self.len()) }
    }

    pub fn get(&self, index: usize) -> Option<&JobRecord> {
        self.records().get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut JobRecord> {
        if index < self.len() {
            Some(unsafe { &mut *self.records_ptr().add(index) })
        } else {
            None
        }
    }
}

/// Finalize the first record whose pid matches: accumulate the elapsed time
/// since its start stamp and set `completed`. No match is a silent no-op.
///
/// This is the completion tracker's entry point. It acquires the guard
/// itself and performs no allocation and no blocking work beyond the
/// semaphore and the O(count) scan, so it is callable from signal context.
///
/// # Safety
/// `header` must point to a live mapped table region.
pub(crate) unsafe fn complete_raw(header: *mut TableHeader, pid: i32, now_us: i64) {
    let sem = addr_of_mut!((*header).mutex);
    loop {
        if libc::sem_wait(sem) == 0 {
            break;
        }
        if *libc::__errno_location() != libc::EINTR {
            return;
        }
    }
    let count = (*header).count as usize;
    let records = (header as *mut u8).add(records_offset()) as *mut JobRecord;
    for i in 0..count {
        let rec = records.add(i);
        if (*rec).pid == pid {
            let elapsed = elapsed_ms((*rec).started_at_us, now_us);
            (*rec).execution_ms = (*rec).execution_ms.wrapping_add(elapsed);
            (*rec).completed = true;
            break;
        }
    }
    libc::sem_post(sem);
}
