//! CPU mode transitions for x86_64
//!
//! Long mode down to flat 32-bit protected mode, for kernels without a
//! 64-bit entry. Firmware must be done with the machine by now: paging
//! goes off, so this code, its stack and the GDT below must be identity
//! mapped under 4 GiB.

/// Boot protocol segment selectors (`__BOOT_CS`, `__BOOT_DS`).
pub const BOOT_CS: u16 = 0x10;
pub const BOOT_DS: u16 = 0x18;

#[repr(C, align(16))]
struct Gdt([u64; 4]);

// Flat 4 GiB segments, base 0, granularity 4 KiB
static TRAMPOLINE_GDT: Gdt = Gdt([
    0,
    0,
    0x00cf_9a00_0000_ffff, // 0x10: 32-bit code, execute/read
    0x00cf_9200_0000_ffff, // 0x18: 32-bit data, read/write
]);

/// Drop from 64-bit long mode to 32-bit protected mode and jump to
/// `entry` with `%esi` = `boot_params`.
///
/// Sequence: load the flat GDT, far-return into the 32-bit code segment
/// (compatibility mode), reload data segments, clear CR0.PG, clear
/// EFER.LME, jump. `%ebp`, `%edi` and `%ebx` are zeroed as the 32-bit
/// protocol asks.
///
/// Does NOT return.
#[unsafe(naked)]
pub unsafe extern "sysv64" fn drop_to_protected_mode(entry: u32, boot_params: u32) -> ! {
    core::arch::naked_asm!(
        "cli",
        "cld",
        // entry in %edi, boot_params in %esi; both survive the mode switch
        "leaq {gdt}(%rip), %rax",
        "subq $16, %rsp",
        "movw ${limit}, (%rsp)",
        "movq %rax, 2(%rsp)",
        "lgdt (%rsp)",
        "addq $16, %rsp",
        "leaq 3f(%rip), %rax",
        "pushq ${code}",
        "pushq %rax",
        "lretq",
        ".code32",
        "3:",
        "movl ${data}, %eax",
        "movw %ax, %ds",
        "movw %ax, %es",
        "movw %ax, %fs",
        "movw %ax, %gs",
        "movw %ax, %ss",
        // Paging off takes the CPU out of long mode
        "movl %cr0, %eax",
        "andl $0x7fffffff, %eax",
        "movl %eax, %cr0",
        "movl $0xc0000080, %ecx", // IA32_EFER
        "rdmsr",
        "andl $0xfffffeff, %eax", // LME
        "wrmsr",
        "movl %edi, %eax",
        "xorl %ebx, %ebx",
        "xorl %ebp, %ebp",
        "xorl %edi, %edi",
        "jmp *%eax",
        ".code64",
        gdt = sym TRAMPOLINE_GDT,
        limit = const 4 * 8 - 1,
        code = const BOOT_CS,
        data = const BOOT_DS,
        options(att_syntax),
    )
}
