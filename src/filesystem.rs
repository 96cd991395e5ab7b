//! The verb dispatcher: a fuser `Filesystem` that delegates every
//! operation to the backing directory after byte-substituting paths and
//! content.
//!
//! Each handler follows the same shape: resolve the inode to a virtual
//! path, compute the backing path through the [`PathMapper`], perform
//! exactly one backing syscall, translate its failure into an errno and
//! reply. Content buffers are owned by the single request that allocated
//! them; the only shared state is the immutable mapper and the
//! internally-synchronized inode table.

use crate::config::MountConfig;
use crate::error::{RotfsError, RotfsResult};
use crate::inode::{InodeTable, ROOT_INODE};
use crate::paths::PathMapper;
use crate::table::SubstitutionTable;
use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use libc::c_int;
use nix::errno::Errno;
use nix::fcntl::{OFlag, open};
use nix::sys::stat::Mode;
use nix::sys::uio::{pread, pwrite};
use nix::unistd;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::os::fd::{BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, trace};

/// ROT13 overlay filesystem.
///
/// Presents the backing directory through the mount point with every path
/// component and every content byte substitution-transformed. Reading a
/// virtual file reveals plaintext; the backing file stays obfuscated.
pub struct RotFs {
    /// Virtual-to-backing path mapping (immutable after construction).
    mapper: PathMapper,
    /// Inode to virtual-path table.
    inodes: InodeTable,
    /// Mount configuration (TTL, fsname, flags).
    config: MountConfig,
}

impl RotFs {
    /// Creates a filesystem over an already-canonicalized backing root.
    pub fn new(backing_root: PathBuf, config: MountConfig) -> Self {
        Self {
            mapper: PathMapper::new(backing_root, SubstitutionTable::new()),
            inodes: InodeTable::new(),
            config,
        }
    }

    /// The path mapper in use.
    pub fn mapper(&self) -> &PathMapper {
        &self.mapper
    }

    fn virtual_path(&self, ino: u64) -> RotfsResult<PathBuf> {
        self.inodes
            .path_of(ino)
            .ok_or(RotfsError::InvalidInode(ino))
    }

    fn virtual_child(&self, parent: u64, name: &OsStr) -> RotfsResult<PathBuf> {
        Ok(self.virtual_path(parent)?.join(name))
    }

    fn lookup_impl(&self, parent: u64, name: &OsStr) -> RotfsResult<(u64, FileAttr)> {
        let vpath = self.virtual_child(parent, name)?;
        let backing = self.mapper.backing_path(&vpath);
        // Symlinks are reported as themselves, never followed.
        let meta = fs::symlink_metadata(&backing)?;
        let ino = self.inodes.get_or_insert(&vpath);
        Ok((ino, file_attr_from_metadata(ino, &meta)))
    }

    fn getattr_impl(&self, ino: u64) -> RotfsResult<FileAttr> {
        let vpath = self.virtual_path(ino)?;
        let backing = self.mapper.backing_path(&vpath);
        let meta = fs::symlink_metadata(&backing)?;
        Ok(file_attr_from_metadata(ino, &meta))
    }

    /// Applies mode, ownership and size changes to the backing path.
    ///
    /// Timestamp updates (atime/mtime) are deliberately NOT applied: the
    /// overlay accepts them and reports success without touching the
    /// backing store. Timestamps carry no meaning under the obfuscation
    /// model.
    fn setattr_impl(
        &self,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
    ) -> RotfsResult<FileAttr> {
        let vpath = self.virtual_path(ino)?;
        let backing = self.mapper.backing_path(&vpath);

        if let Some(mode) = mode {
            fs::set_permissions(&backing, fs::Permissions::from_mode(mode))?;
        }
        if uid.is_some() || gid.is_some() {
            std::os::unix::fs::chown(&backing, uid, gid)?;
        }
        if let Some(size) = size {
            // The substitution is byte-positional, so truncation needs no
            // content rewrite.
            unistd::truncate(&backing, size as i64)?;
        }

        let meta = fs::symlink_metadata(&backing)?;
        Ok(file_attr_from_metadata(ino, &meta))
    }

    /// Collects the full listing for a directory, entry names
    /// reveal-transformed, `.` and `..` synthesized up front.
    ///
    /// A directory that cannot be opened is reported as a plain "not
    /// found"; the underlying cause is not inspected.
    fn list_dir_impl(&self, ino: u64) -> RotfsResult<Vec<(u64, FileType, OsString)>> {
        let vpath = self.virtual_path(ino)?;
        let backing = self.mapper.backing_path(&vpath);
        let dir = fs::read_dir(&backing).map_err(|_| RotfsError::Errno(Errno::ENOENT))?;

        let parent_ino = match vpath.parent() {
            Some(parent) => self.inodes.get_or_insert_no_lookup(parent),
            None => ROOT_INODE,
        };
        let mut entries = vec![
            (ino, FileType::Directory, OsString::from(".")),
            (parent_ino, FileType::Directory, OsString::from("..")),
        ];
        for entry in dir {
            let Ok(entry) = entry else { continue };
            let plain = self.mapper.reveal_name(&entry.file_name());
            let kind = entry
                .file_type()
                .map(fuse_kind_from_file_type)
                .unwrap_or(FileType::RegularFile);
            let child_ino = self.inodes.get_or_insert_no_lookup(&vpath.join(&plain));
            entries.push((child_ino, kind, plain));
        }
        Ok(entries)
    }

    fn open_impl(&self, ino: u64, flags: i32) -> RotfsResult<RawFd> {
        let vpath = self.virtual_path(ino)?;
        let backing = self.mapper.backing_path(&vpath);
        let fd = open(&backing, OFlag::from_bits_truncate(flags), Mode::empty())?;
        // The raw fd rides in the FUSE file handle; the kernel threads it
        // back through read/write/release for this open file.
        Ok(fd.into_raw_fd())
    }

    fn create_impl(
        &self,
        parent: u64,
        name: &OsStr,
        mode: u32,
        flags: i32,
    ) -> RotfsResult<(u64, FileAttr, RawFd)> {
        let vpath = self.virtual_child(parent, name)?;
        let backing = self.mapper.backing_path(&vpath);
        let oflag = OFlag::from_bits_truncate(flags) | OFlag::O_CREAT;
        let fd = open(
            &backing,
            oflag,
            Mode::from_bits_truncate(mode as libc::mode_t),
        )?;
        let meta = fs::symlink_metadata(&backing)?;
        let ino = self.inodes.get_or_insert(&vpath);
        Ok((ino, file_attr_from_metadata(ino, &meta), fd.into_raw_fd()))
    }

    /// Positioned read from the backing fd, revealed in place.
    fn read_impl(&self, fh: u64, offset: i64, size: u32) -> RotfsResult<Vec<u8>> {
        let mut buffer = vec![0u8; size as usize];
        let fd = unsafe { BorrowedFd::borrow_raw(fh as RawFd) };
        let read = pread(fd, &mut buffer, offset)?;
        buffer.truncate(read);
        self.mapper.table().transform_in_place(&mut buffer);
        Ok(buffer)
    }

    /// Positioned write to the backing fd, obfuscated first.
    fn write_impl(&self, fh: u64, offset: i64, data: &[u8]) -> RotfsResult<usize> {
        let transformed = self.mapper.table().transform(data);
        let fd = unsafe { BorrowedFd::borrow_raw(fh as RawFd) };
        Ok(pwrite(fd, &transformed, offset)?)
    }

    fn unlink_impl(&self, parent: u64, name: &OsStr) -> RotfsResult<()> {
        let vpath = self.virtual_child(parent, name)?;
        let backing = self.mapper.backing_path(&vpath);
        fs::remove_file(&backing)?;
        self.inodes.invalidate_path(&vpath);
        Ok(())
    }

    fn mkdir_impl(&self, parent: u64, name: &OsStr, mode: u32) -> RotfsResult<(u64, FileAttr)> {
        let vpath = self.virtual_child(parent, name)?;
        let backing = self.mapper.backing_path(&vpath);
        unistd::mkdir(&backing, Mode::from_bits_truncate(mode as libc::mode_t))?;
        let meta = fs::symlink_metadata(&backing)?;
        let ino = self.inodes.get_or_insert(&vpath);
        Ok((ino, file_attr_from_metadata(ino, &meta)))
    }

    fn rmdir_impl(&self, parent: u64, name: &OsStr) -> RotfsResult<()> {
        let vpath = self.virtual_child(parent, name)?;
        let backing = self.mapper.backing_path(&vpath);
        fs::remove_dir(&backing)?;
        self.inodes.invalidate_path(&vpath);
        Ok(())
    }

    fn rename_impl(
        &self,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
    ) -> RotfsResult<()> {
        let old_vpath = self.virtual_child(parent, name)?;
        let new_vpath = self.virtual_child(newparent, newname)?;
        let old_backing = self.mapper.backing_path(&old_vpath);
        let new_backing = self.mapper.backing_path(&new_vpath);
        fs::rename(&old_backing, &new_backing)?;
        self.inodes.rename_path(&old_vpath, &new_vpath);
        Ok(())
    }
}

impl Filesystem for RotFs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        info!(root = %self.mapper.root().display(), "overlay filesystem initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        info!("overlay filesystem destroyed");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        trace!(parent, name = ?name, "lookup");
        match self.lookup_impl(parent, name) {
            Ok((_ino, attr)) => reply.entry(&self.config.attr_ttl, &attr, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        trace!(ino, nlookup, "forget");
        self.inodes.forget(ino, nlookup);
    }

    fn batch_forget(&mut self, _req: &Request<'_>, nodes: &[fuser::fuse_forget_one]) {
        trace!(count = nodes.len(), "batch_forget");
        for node in nodes {
            self.inodes.forget(node.nodeid, node.nlookup);
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        trace!(ino, "getattr");
        match self.getattr_impl(ino) {
            Ok(attr) => reply.attr(&self.config.attr_ttl, &attr),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        trace!(
            ino,
            mode = ?mode,
            uid = ?uid,
            gid = ?gid,
            size = ?size,
            times = atime.is_some() || mtime.is_some(),
            "setattr"
        );
        match self.setattr_impl(ino, mode, uid, gid, size) {
            Ok(attr) => reply.attr(&self.config.attr_ttl, &attr),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        trace!(ino, offset, "readdir");
        let entries = match self.list_dir_impl(ino) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };
        for (i, (entry_ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            // The offset handed back for each entry is the index of the
            // NEXT entry, so a restarted listing resumes past this one.
            if reply.add(entry_ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        trace!(ino, flags, "open");
        match self.open_impl(ino, flags) {
            Ok(fd) => reply.opened(fd as u64, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        trace!(parent, name = ?name, mode, flags, "create");
        match self.create_impl(parent, name, mode, flags) {
            Ok((_ino, attr, fd)) => reply.created(&self.config.attr_ttl, &attr, 0, fd as u64, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        trace!(ino, fh, offset, size, "read");
        match self.read_impl(fh, offset, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        trace!(ino, fh, offset, size = data.len(), "write");
        match self.write_impl(fh, offset, data) {
            Ok(written) => reply.written(written as u32),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        trace!(fh, "release");
        // The handle carries the backing fd; reclaim and close it exactly
        // once. FUSE sends one release per open.
        drop(unsafe { OwnedFd::from_raw_fd(fh as RawFd) });
        reply.ok();
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        trace!(parent, name = ?name, "unlink");
        match self.unlink_impl(parent, name) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        trace!(parent, name = ?name, mode, "mkdir");
        match self.mkdir_impl(parent, name, mode) {
            Ok((_ino, attr)) => reply.entry(&self.config.attr_ttl, &attr, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        trace!(parent, name = ?name, "rmdir");
        match self.rmdir_impl(parent, name) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        trace!(parent, name = ?name, newparent, newname = ?newname, "rename");
        match self.rename_impl(parent, name, newparent, newname) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }
}

/// Converts backing-store metadata into a FUSE attribute record.
///
/// Attributes pass through unchanged apart from the inode number, which is
/// the overlay's own.
fn file_attr_from_metadata(ino: u64, meta: &fs::Metadata) -> FileAttr {
    FileAttr {
        ino,
        size: meta.size(),
        blocks: meta.blocks(),
        atime: timestamp(meta.atime(), meta.atime_nsec()),
        mtime: timestamp(meta.mtime(), meta.mtime_nsec()),
        ctime: timestamp(meta.ctime(), meta.ctime_nsec()),
        crtime: UNIX_EPOCH,
        kind: fuse_kind_from_file_type(meta.file_type()),
        perm: (meta.mode() & 0o7777) as u16,
        nlink: meta.nlink() as u32,
        uid: meta.uid(),
        gid: meta.gid(),
        rdev: meta.rdev() as u32,
        blksize: meta.blksize() as u32,
        flags: 0,
    }
}

fn fuse_kind_from_file_type(ft: fs::FileType) -> FileType {
    if ft.is_dir() {
        FileType::Directory
    } else if ft.is_symlink() {
        FileType::Symlink
    } else if ft.is_fifo() {
        FileType::NamedPipe
    } else if ft.is_char_device() {
        FileType::CharDevice
    } else if ft.is_block_device() {
        FileType::BlockDevice
    } else if ft.is_socket() {
        FileType::Socket
    } else {
        FileType::RegularFile
    }
}

fn timestamp(secs: i64, nsecs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::new(secs as u64, nsecs as u32)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}
