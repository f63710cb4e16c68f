//! Long-mode kernel entries
//!
//! Two paths that never leave 64-bit mode:
//! 1. EFI handover: called like a function, boot services still up
//! 2. startup_64: plain jump, `%rsi` = zero page

/// EFI handover entry
///
/// `efi64_stub_entry(handle, system_table, boot_params)` is a SysV call;
/// it is entered with `call` on a 16-byte aligned stack so the stub sees
/// the frame it was compiled for.
///
/// Does NOT return.
#[unsafe(naked)]
pub unsafe extern "sysv64" fn efi_handover_64(
    entry: u64,
    image_handle: u64,
    system_table: u64,
    boot_params: u64,
) -> ! {
    core::arch::naked_asm!(
        "cli",
        "cld",
        "mov rax, rdi", // entry
        "mov rdi, rsi", // image handle
        "mov rsi, rdx", // system table
        "mov rdx, rcx", // boot params
        "and rsp, -16",
        "call rax",
        // The stub exits boot services itself and never comes back
        "2:",
        "hlt",
        "jmp 2b",
    )
}

/// 64-bit boot protocol entry at load address + 0x200
///
/// Does NOT return.
#[unsafe(naked)]
pub unsafe extern "sysv64" fn jump_to_startup_64(entry: u64, boot_params: u64) -> ! {
    core::arch::naked_asm!(
        "cli",
        "cld",
        "xor ebx, ebx",
        "xor ebp, ebp",
        // boot_params already sits in rsi
        "jmp rdi",
    )
}
