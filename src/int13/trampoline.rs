//! Interrupt stub binding
//!
//! The one unavoidable architecture-specific leaf: the CPU enters INT 13
//! through a real-mode stub, and everything above it is plain code. The
//! stub's contract with the dispatcher:
//!
//! - On entry it saves BP, snapshots AX and DX, then pushes FLAGS, ES, DS,
//!   AX, CX, DX, BX, SI, DI, leaving a [`RegisterFrame`] on the stack with
//!   DI at the lowest address.
//! - The frame's flags start with carry set (an unserviced call reports
//!   failure) and overflow clear.
//! - It calls the dispatcher with a pointer to the frame. The dispatcher
//!   signals "handled, do not chain" by setting the overflow flag in the
//!   frame; otherwise the stub pushes flags and far-calls the saved
//!   original vector with the (possibly remapped) frame registers loaded.
//! - The frame's flags are copied over the IRET frame's flags word, the DL
//!   fix-up runs against the entry AH/DL snapshot, the frame is popped and
//!   the stub returns with IRET.
//!
//! The higher layers bind into the stub through a single function-pointer
//! table ([`bind`]); the embedding firmware's platform glue provides the
//! real-mode-to-Rust transfer thunks (`sanboot_int13_dispatch_thunk`,
//! `sanboot_int13_fixup_thunk`) and mirrors the chain vector into the
//! relocated stub's patch slot when the hook is installed.

use core::sync::atomic::{AtomicU32, Ordering};

use spin::Once;

use super::Control;
use super::frame::RegisterFrame;
use crate::realmode::SegOff;

/// Dispatcher entry bound by the embedding firmware.
pub type DispatchFn = fn(&mut RegisterFrame) -> Control;
/// DL fix-up entry: frame, entry AH, entry DL.
pub type FixupFn = fn(&mut RegisterFrame, u8, u8);

/// The function-pointer table the stub dispatches through.
pub struct TrampolineOps {
    pub dispatch: DispatchFn,
    pub fixup: FixupFn,
}

static OPS: Once<TrampolineOps> = Once::new();

/// Original INT 13 vector, packed segment:offset, for the chain path.
static CHAIN_VECTOR: AtomicU32 = AtomicU32::new(0);

/// Bind the dispatcher and fix-up entries. Only the first call takes
/// effect.
pub fn bind(ops: TrampolineOps) {
    OPS.call_once(|| ops);
}

pub(crate) fn set_chain_vector(at: SegOff) {
    CHAIN_VECTOR.store(
        ((at.segment as u32) << 16) | at.offset as u32,
        Ordering::Relaxed,
    );
}

/// The saved original handler the stub chains to.
pub fn chain_vector() -> SegOff {
    let packed = CHAIN_VECTOR.load(Ordering::Relaxed);
    SegOff::new((packed >> 16) as u16, packed as u16)
}

/// Protected-mode endpoint of the stub's dispatch call.
///
/// # Safety
///
/// `frame` must point to a live register frame built by the stub; the stub
/// guarantees this for the duration of the call.
#[unsafe(no_mangle)]
pub extern "C" fn sanboot_int13_dispatch(frame: *mut RegisterFrame) {
    let Some(ops) = OPS.get() else {
        return;
    };
    let frame = unsafe { &mut *frame };
    (ops.dispatch)(frame);
}

/// Protected-mode endpoint of the stub's fix-up call.
#[unsafe(no_mangle)]
pub extern "C" fn sanboot_int13_fixup(frame: *mut RegisterFrame, entry_ax: u16, entry_dx: u16) {
    let Some(ops) = OPS.get() else {
        return;
    };
    let frame = unsafe { &mut *frame };
    (ops.fixup)(frame, (entry_ax >> 8) as u8, entry_dx as u8);
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
core::arch::global_asm!(
    r#"
    .section .text16, "ax", @progbits
    .code16
    .balign 16

    /* Original INT 13 vector, patched by the installer glue. */
    .global sanboot_int13_chain_vector
sanboot_int13_chain_vector:
    .long 0

    .global sanboot_int13_stub
sanboot_int13_stub:
    pushw %bp
    movw %sp, %bp
    /* Snapshot AX and DX for the exit fix-up. */
    pushw %ax
    pushw %dx
    /* Capture the register frame, DI ending up lowest. */
    pushfw
    pushw %es
    pushw %ds
    pushw %ax
    pushw %cx
    pushw %dx
    pushw %bx
    pushw %si
    pushw %di
    /* Entry contract: carry set, overflow clear. */
    orw $0x0001, -6(%bp)
    andw $0xf7ff, -6(%bp)
    /* Dispatch with a pointer to the frame. */
    movw %sp, %ax
    pushw %ax
    callw sanboot_int13_dispatch_thunk
    popw %ax
    /* Overflow set in the frame means handled: skip the chain. */
    testw $0x0800, -6(%bp)
    jnz 1f
    /* Reload the (possibly remapped) registers and chain to the saved
     * vector as if freshly interrupted. */
    popw %di
    popw %si
    popw %bx
    popw %dx
    popw %cx
    popw %ax
    popw %ds
    popw %es
    popfw
    pushfw
    lcallw *%cs:sanboot_int13_chain_vector
    /* Re-capture the frame so the fix-up sees the chained result. */
    pushfw
    pushw %es
    pushw %ds
    pushw %ax
    pushw %cx
    pushw %dx
    pushw %bx
    pushw %si
    pushw %di
1:
    /* Propagate the frame's flags into the IRET frame. */
    movw -6(%bp), %ax
    movw %ax, 6(%bp)
    /* DL fix-up against the entry snapshots. */
    movw -4(%bp), %ax
    pushw %ax
    movw -2(%bp), %ax
    pushw %ax
    movw %sp, %ax
    addw $4, %ax
    pushw %ax
    callw sanboot_int13_fixup_thunk
    addw $6, %sp
    /* Unwind the frame and return. */
    popw %di
    popw %si
    popw %bx
    popw %dx
    popw %cx
    popw %ax
    popw %ds
    popw %es
    addw $6, %sp
    popw %bp
    iret
"#,
    options(att_syntax)
);
