//! INT 13 disk services emulation
//!
//! Intercepts the BIOS disk service interrupt and services it from SAN
//! block devices, so that unmodified boot loaders (MBR boot code, El Torito
//! images, DOS-era loaders) can boot from a network volume as though it
//! were a local floppy or fixed disk.
//!
//! The module owns three pieces of machine-global state while at least one
//! drive is registered: the interrupt vector (pointed at the real-mode stub,
//! see [`trampoline`]), and the BIOS data area's equipment word and
//! fixed-disk count, which the reconciler keeps consistent with the set of
//! emulated drives even across firmware rescans.

pub mod boot;
mod commands;
pub mod eltorito;
pub mod frame;
pub mod geometry;
pub mod packets;
pub mod trampoline;

use heapless::Vec;

use crate::SanError;
use crate::block::{BlockError, SanDevice};
use crate::realmode::{
    EQUIPMENT_FDD_COUNT_MASK, EQUIPMENT_FDD_COUNT_SHIFT, EQUIPMENT_FDD_PRESENT, RealMemory, SegOff,
};
use frame::RegisterFrame;
use geometry::Geometry;

/// Interrupt vector owned by the emulation.
pub const INT13_VECTOR: u8 = 0x13;
/// Maximum number of simultaneously emulated drives.
pub const MAX_DRIVES: usize = 8;
/// Block size required by the CHS transfer subfunctions.
pub const SECTOR_SIZE: usize = 512;
/// Largest supported device block size (CD-ROM sectors).
pub const MAX_BLOCK_SIZE: usize = 2048;
/// Non-drive-specific CD-ROM drive number accepted by subfunction 0x4B,
/// also usable with `hook` to request the natural drive number.
pub const DRIVE_CDROM_WILDCARD: u8 = 0x7f;

bitflags::bitflags! {
    /// Per-drive behavior flags accepted by [`Int13Emulator::hook`].
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct HookFlags: u32 {
        /// Let extended verify (AH=0x44) report success instead of the
        /// bug-compatible invalid-function status.
        const PERMISSIVE_VERIFY = 0x0001;
    }
}

/// Handler failure. The dispatcher is the sole place converting these to
/// the INT 13 carry-flag / AH status convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Int13Error {
    /// Malformed request, unsupported subfunction, wrong block size or
    /// out-of-range CHS.
    Invalid,
    /// I/O failed at the block layer.
    ReadError,
    /// Device reset failed.
    ResetFailed,
    /// Device not ready (stale connection could not be reopened).
    NotReady,
}

impl Int13Error {
    /// The INT 13 status byte reported in AH.
    pub fn status(self) -> u8 {
        match self {
            Int13Error::Invalid => 0x01,
            Int13Error::ReadError => 0x04,
            Int13Error::ResetFailed => 0x05,
            Int13Error::NotReady => 0xaa,
        }
    }
}

impl From<BlockError> for Int13Error {
    fn from(_: BlockError) -> Self {
        Int13Error::ReadError
    }
}

/// Dispatcher verdict handed back to the interrupt stub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// The frame holds the synthesized reply; do not chain.
    Handled,
    /// Pass the call through to the original handler.
    Chain,
}

/// Low-memory placement decisions made by the embedding firmware.
///
/// All four regions must sit in base memory that survives until the loaded
/// OS takes over; `xbft` must be 16-byte aligned.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Real-mode address of the installed interrupt stub.
    pub trampoline: SegOff,
    /// Where the 11-byte diskette parameter table lives.
    pub fdd_parameter_table: SegOff,
    /// Base of the boot firmware table pool.
    pub xbft: SegOff,
    /// Scratch area for command packets issued by the boot record loader.
    pub scratch: SegOff,
}

/// What kind of BIOS drive a volume is emulated as. El Torito state exists
/// only for CD-ROMs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriveKind {
    Floppy,
    HardDisk,
    Cdrom { boot_catalog: Option<u32> },
}

/// One registered SAN volume and its emulation state.
pub struct EmulatedDrive<D> {
    device: D,
    drive: u8,
    natural_drive: u8,
    geometry: Geometry,
    kind: DriveKind,
    flags: HookFlags,
    last_status: u8,
}

impl<D> EmulatedDrive<D> {
    pub fn drive(&self) -> u8 {
        self.drive
    }

    /// The drive number this volume would have received had it been
    /// appended to the live BIOS drive list at registration time.
    pub fn natural_drive(&self) -> u8 {
        self.natural_drive
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn kind(&self) -> DriveKind {
        self.kind
    }

    /// Status byte of the most recent handler invocation, reported by
    /// subfunction 0x01.
    pub fn last_status(&self) -> u8 {
        self.last_status
    }

    pub fn is_fdd(&self) -> bool {
        self.drive & 0x80 == 0
    }

    pub fn is_cdrom(&self) -> bool {
        matches!(self.kind, DriveKind::Cdrom { .. })
    }

    pub fn device(&self) -> &D {
        &self.device
    }
}

/// The INT 13 emulation core.
///
/// Owns the registered drives, the cached mirrors of the firmware's drive
/// counters, and the boot firmware table high-water mark. The embedding
/// firmware threads its [`RealMemory`] implementation into every entry
/// point.
pub struct Int13Emulator<D> {
    config: Config,
    drives: Vec<EmulatedDrive<D>, MAX_DRIVES>,
    /// Original vector 0x13 contents; `Some` exactly while hooked.
    original_vector: Option<SegOff>,
    /// Cached BDA equipment word, as last written by the reconciler.
    equipment: u16,
    /// Cached BDA fixed-disk count.
    num_drives: u8,
    /// Diskette count derived from the equipment word.
    num_fdds: u8,
    /// Boot firmware table pool high-water mark, always 16-byte aligned.
    xbft_used: usize,
}

impl<D: SanDevice> Int13Emulator<D> {
    pub fn new(config: Config) -> Self {
        Int13Emulator {
            config,
            drives: Vec::new(),
            original_vector: None,
            equipment: 0,
            num_drives: 0,
            num_fdds: 0,
            xbft_used: 0,
        }
    }

    /// Register `device` as BIOS drive `drive` and start emulating it.
    ///
    /// Passing [`DRIVE_CDROM_WILDCARD`] requests the natural drive number.
    /// The first registered drive installs the interrupt stub; the original
    /// vector is restored once the last drive is unhooked.
    pub fn hook<M: RealMemory>(
        &mut self,
        mem: &mut M,
        drive: u8,
        mut device: D,
        flags: HookFlags,
    ) -> Result<u8, SanError> {
        let block_size = device.block_size();
        if block_size == 0 || block_size > MAX_BLOCK_SIZE || !block_size.is_power_of_two() {
            return Err(SanError::UnsupportedBlockSize);
        }
        if self.drives.is_full() {
            return Err(SanError::TooManyDrives);
        }

        self.sync_counts(mem);

        // The number the BIOS itself would assign if this volume were
        // appended to its enumeration right now.
        let natural_hdd = 0x80 | self.num_drives.min(0x7f);
        let drive = if drive == DRIVE_CDROM_WILDCARD {
            natural_hdd
        } else {
            drive
        };
        let natural_drive = if drive & 0x80 != 0 {
            natural_hdd
        } else {
            self.num_fdds.min(0x7f)
        };

        if self.find(drive).is_some() {
            return Err(SanError::DriveInUse);
        }

        let kind = if device.is_cdrom() {
            let boot_catalog = eltorito::boot_catalog(&mut device).map_err(SanError::Block)?;
            DriveKind::Cdrom { boot_catalog }
        } else if drive & 0x80 == 0 {
            DriveKind::Floppy
        } else {
            DriveKind::HardDisk
        };

        let geometry = match kind {
            DriveKind::Floppy => geometry::guess_fdd(device.capacity()),
            DriveKind::HardDisk => geometry::guess_hdd(&mut device).map_err(SanError::Block)?,
            // CDs have no partition table to infer from; CHS transfers are
            // rejected anyway because of the block size.
            DriveKind::Cdrom { .. } => Geometry::from_capacity(
                device.capacity(),
                geometry::MAX_HEADS,
                geometry::MAX_SECTORS_PER_TRACK,
            ),
        };
        log::debug!(
            "drive {:02x} geometry {}/{}/{}",
            drive,
            geometry.cylinders,
            geometry.heads,
            geometry.sectors_per_track
        );

        let record = EmulatedDrive {
            device,
            drive,
            natural_drive,
            geometry,
            kind,
            flags,
            last_status: 0,
        };
        if self.drives.push(record).is_err() {
            return Err(SanError::TooManyDrives);
        }
        self.sync_counts(mem);

        if self.original_vector.is_none() {
            self.install(mem);
        }

        log::info!(
            "registered drive {:02x} (natural drive {:02x})",
            drive,
            natural_drive
        );
        Ok(drive)
    }

    /// Stop emulating `drive`, returning its device to the block layer.
    ///
    /// Restores the original interrupt vector when the last drive goes.
    /// The BDA drive counters are deliberately left alone: there is no way
    /// to tell whether the firmware re-counted in the meantime.
    pub fn unhook<M: RealMemory>(&mut self, mem: &mut M, drive: u8) -> Option<D> {
        let Some(index) = self.drives.iter().position(|d| d.drive == drive) else {
            log::warn!("unhook of unregistered drive {:02x}", drive);
            return None;
        };
        let record = self.drives.remove(index);
        if self.drives.is_empty() {
            if let Some(original) = self.original_vector.take() {
                mem.set_interrupt_vector(INT13_VECTOR, original);
                log::debug!("restored INT {:02x} vector to {}", INT13_VECTOR, original);
            }
        }
        log::info!("unregistered drive {:02x}", drive);
        Some(record.device)
    }

    /// The emulated drives, in registration order.
    pub fn drives(&self) -> impl Iterator<Item = &EmulatedDrive<D>> {
        self.drives.iter()
    }

    pub fn is_hooked(&self) -> bool {
        self.original_vector.is_some()
    }

    /// Offer the boot firmware table installer to every drive's producer.
    pub fn describe<M: RealMemory>(&mut self, mem: &mut M) -> Result<(), SanError> {
        let Int13Emulator {
            drives,
            config,
            xbft_used,
            ..
        } = self;
        let mut installer = crate::xbft::TableInstaller::new(mem, config.xbft, xbft_used);
        for drive in drives.iter() {
            drive
                .device
                .acpi_describe(&mut |table| installer.install(table))?;
        }
        Ok(())
    }

    /// Service an intercepted INT 13 register frame.
    ///
    /// This is the dispatcher: it reconciles the drive counters, finds the
    /// addressed drive (directly, by natural-number remap, or via the
    /// CD-ROM wildcard), runs the per-command handler and folds the result
    /// into the frame's AH and carry flag. [`Control::Handled`] is also
    /// signalled out-of-band by setting the overflow flag in the frame, per
    /// the stub ABI.
    pub fn interrupt<M: RealMemory>(
        &mut self,
        mem: &mut M,
        frame: &mut RegisterFrame,
    ) -> Control {
        // Detect the firmware having rescanned drives behind our back.
        self.check_counts(mem);

        let ah = frame.ah();
        let dl = frame.dl();
        let mut matched = None;
        for (index, drive) in self.drives.iter().enumerate() {
            if dl == drive.drive {
                matched = Some(index);
                break;
            }
            if dl == drive.natural_drive {
                // The firmware still services the displaced device under
                // our drive number; let it.
                log::debug!("remapping drive {:02x} to {:02x}", dl, drive.drive);
                frame.set_dl(drive.drive);
                return Control::Chain;
            }
            if dl == DRIVE_CDROM_WILDCARD && ah == 0x4b && drive.is_cdrom() {
                matched = Some(index);
                break;
            }
        }
        let Some(index) = matched else {
            return Control::Chain;
        };

        let result = self.command(index, mem, frame);
        let status = match result {
            Ok(value) => value,
            Err(error) => error.status(),
        };
        self.drives[index].last_status = status;
        match result {
            Ok(value) => {
                frame.set_ah(value);
                frame.set_cf(false);
            }
            Err(error) => {
                log::debug!(
                    "command {:02x} on drive {:02x} failed: {:?} (status {:02x})",
                    ah,
                    dl,
                    error,
                    error.status()
                );
                frame.set_ah(error.status());
                frame.set_cf(true);
            }
        }
        frame.set_of(true);
        Control::Handled
    }

    /// Full interrupt service path, mirroring the stub's behavior in plain
    /// code: snapshot AH/DL, dispatch, chain to `chain` (the original
    /// handler) if unhandled, then apply the DL fix-up table.
    pub fn service<M, F>(&mut self, mem: &mut M, frame: &mut RegisterFrame, chain: F)
    where
        M: RealMemory,
        F: FnOnce(&mut RegisterFrame, &mut M),
    {
        let entry_ah = frame.ah();
        let entry_dl = frame.dl();
        // Entry state the stub establishes: carry set so an unserviced call
        // reports failure, overflow clear for the handled signal.
        frame.set_cf(true);
        frame.set_of(false);
        if let Control::Chain = self.interrupt(mem, frame) {
            chain(frame, mem);
        }
        self.dl_fixup(frame, entry_ah, entry_dl);
    }

    /// Restore DL on the return path the way the firmware itself would
    /// have: get-parameters reports the relevant drive count, get-disk-type
    /// on a hard disk leaves DL alone, everything else sees the caller's
    /// value preserved.
    pub fn dl_fixup(&self, frame: &mut RegisterFrame, entry_ah: u8, entry_dl: u8) {
        match entry_ah {
            0x15 if entry_dl & 0x80 != 0 => {}
            0x08 => {
                if entry_dl & 0x80 != 0 {
                    frame.set_dl(self.num_drives);
                } else {
                    frame.set_dl(self.num_fdds);
                }
            }
            _ => frame.set_dl(entry_dl),
        }
    }

    pub(crate) fn find(&self, drive: u8) -> Option<usize> {
        self.drives.iter().position(|d| d.drive == drive)
    }

    pub(crate) fn drive(&self, index: usize) -> &EmulatedDrive<D> {
        &self.drives[index]
    }

    pub(crate) fn drive_mut(&mut self, index: usize) -> &mut EmulatedDrive<D> {
        &mut self.drives[index]
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn fdd_count(&self) -> u8 {
        self.num_fdds
    }

    pub(crate) fn hdd_count(&self) -> u8 {
        self.num_drives
    }

    fn install<M: RealMemory>(&mut self, mem: &mut M) {
        let original = mem.interrupt_vector(INT13_VECTOR);
        mem.set_interrupt_vector(INT13_VECTOR, self.config.trampoline);
        mem.copy_to_real(self.config.fdd_parameter_table, &packets::FDD_PARAMETER_TABLE);
        trampoline::set_chain_vector(original);
        self.original_vector = Some(original);
        log::debug!(
            "hooked INT {:02x} vector (was {}, now {})",
            INT13_VECTOR,
            original,
            self.config.trampoline
        );
    }

    /// Reconciler check: resync the BDA counters if the firmware has
    /// changed them since we last wrote them.
    fn check_counts<M: RealMemory>(&mut self, mem: &mut M) {
        if mem.equipment_word() != self.equipment || mem.fixed_disk_count() != self.num_drives {
            log::debug!("firmware changed drive counts, resyncing");
            self.sync_counts(mem);
        }
    }

    /// Reconciler sync: re-read the firmware's counters, raise them to
    /// cover every emulated drive (by its own number and by its natural
    /// number), and write them back.
    fn sync_counts<M: RealMemory>(&mut self, mem: &mut M) {
        let equipment = mem.equipment_word();
        let mut num_drives = mem.fixed_disk_count();
        let mut num_fdds = if equipment & EQUIPMENT_FDD_PRESENT != 0 {
            (((equipment & EQUIPMENT_FDD_COUNT_MASK) >> EQUIPMENT_FDD_COUNT_SHIFT) as u8) + 1
        } else {
            0
        };

        for drive in self.drives.iter() {
            let counter = if drive.is_fdd() {
                &mut num_fdds
            } else {
                &mut num_drives
            };
            let floor = ((drive.drive & 0x7f) + 1).max((drive.natural_drive & 0x7f) + 1);
            if *counter < floor {
                *counter = floor;
            }
        }

        mem.set_fixed_disk_count(num_drives);
        let mut equipment = equipment & !(EQUIPMENT_FDD_PRESENT | EQUIPMENT_FDD_COUNT_MASK);
        if num_fdds > 0 {
            equipment |= EQUIPMENT_FDD_PRESENT;
            equipment |=
                (num_fdds.min(4) as u16 - 1) << EQUIPMENT_FDD_COUNT_SHIFT;
        }
        mem.set_equipment_word(equipment);

        self.equipment = equipment;
        self.num_drives = num_drives;
        self.num_fdds = num_fdds;
    }
}
