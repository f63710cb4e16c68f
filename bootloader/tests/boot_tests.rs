//! End-to-end boot pipeline tests against a recording platform

mod common;

use common::{expect_transfer, small_vm_map, uefi_map, ImageBuilder, MockPlatform};
use ukistub_bootloader::boot::{
    boot_linux_kernel, decode, negotiate, prepare_boot, BootError, EntryMethod, Handoff,
    HandoffError, KernelError, KernelImage, LoaderConfig, MemoryError, MemoryRange,
    ParamWarning, PlatformCapabilities, RegionKind, XLoadFlags,
};

const CMDLINE: &str = "console=ttyS0 root=/dev/vda";

fn boot(platform: &mut MockPlatform, image: &[u8], ramdisk: Option<&[u8]>, map: &[MemoryRange]) -> Handoff {
    let config = LoaderConfig::default();
    expect_transfer(|| {
        let _ = boot_linux_kernel(platform, &config, image, ramdisk, map, CMDLINE);
    })
}

#[test]
fn test_modern_kernel_uses_efi_handover() {
    let image = ImageBuilder::modern().build();
    let ramdisk = vec![0x5a; 0x3000];
    let mut platform = MockPlatform::uefi();

    let handoff = boot(&mut platform, &image, Some(&ramdisk), &uefi_map());

    assert_eq!(
        handoff,
        Handoff {
            method: EntryMethod::EfiHandover {
                entry: 0x100_0000 + 0x190 + 0x200,
                image_handle: 0x7e00_0000,
                system_table: 0x7f00_0000,
            },
            params: 0x1000,
        }
    );

    // Kernel body at pref_address, ramdisk as high as allowed (above 4G here)
    assert_eq!(platform.written_at(0x100_0000), Some(&image[5 * 512..]));
    assert_eq!(platform.written_at(0x1_3fff_d000), Some(&ramdisk[..]));
    assert_eq!(
        platform.written_at(0x2000),
        Some(format!("{}\0", CMDLINE).as_bytes())
    );

    let zero_page = platform.written_at(0x1000).unwrap();
    assert_eq!(zero_page.len(), 4096);
    let hdr = decode(zero_page).unwrap();
    assert_eq!(hdr.code32_start, 0x100_0000);
    assert_eq!(hdr.cmd_line_ptr, 0x2000);
    assert_eq!(hdr.type_of_loader, 0xFF);
    assert_eq!(hdr.ramdisk_image, 0x3fff_d000);
    assert_eq!(hdr.ramdisk_size, 0x3000);
    assert_eq!(&zero_page[0xc0..0xc4], &1u32.to_le_bytes());
}

#[test]
fn test_boot64_without_firmware() {
    let image = ImageBuilder::modern().build();
    let mut platform = MockPlatform::with_caps(PlatformCapabilities {
        efi: None,
        long_mode: true,
        protected_mode: false,
    });

    let handoff = boot(&mut platform, &image, None, &small_vm_map());

    assert_eq!(handoff.method, EntryMethod::Boot64 { entry: 0x100_0200 });
    assert_eq!(handoff.params, 0x10_0000);
}

#[test]
fn test_old_kernel_drops_to_protected_mode() {
    let image = ImageBuilder::new(0x0202).build();
    let mut platform = MockPlatform::uefi();

    let handoff = boot(&mut platform, &image, None, &small_vm_map());

    // Fixed at 1 MiB; the zero page goes after it
    assert_eq!(handoff.method, EntryMethod::Legacy32 { entry: 0x10_0000 });
    assert_eq!(handoff.params, 0x10_1000);
    let hdr = decode(platform.written_at(0x10_1000).unwrap()).unwrap();
    assert_eq!(hdr.cmd_line_ptr, 0x10_2000);
}

#[test]
fn test_kernel_footprint_zero_filled() {
    let image = ImageBuilder::modern().init_size(0x3000).build();
    let mut platform = MockPlatform::uefi();

    boot(&mut platform, &image, None, &small_vm_map());

    assert_eq!(platform.writes[0].addr, 0x100_0000);
    assert_eq!(platform.writes[0].bytes.len(), 0x1000);
    assert_eq!(platform.writes[1].addr, 0x100_1000);
    assert_eq!(platform.writes[1].bytes, vec![0u8; 0x2000]);
}

#[test]
fn test_bad_magic_touches_nothing() {
    let mut image = ImageBuilder::modern().build();
    image[0x202..0x206].copy_from_slice(b"MZ\0\0");
    let mut platform = MockPlatform::uefi();

    let result = boot_linux_kernel(
        &mut platform,
        &LoaderConfig::default(),
        &image,
        None,
        &small_vm_map(),
        CMDLINE,
    );

    assert_eq!(
        result.map(|_| ()),
        Err(BootError::Kernel(KernelError::BadMagic { found: 0x0000_5a4d }))
    );
    assert!(platform.writes.is_empty());
}

#[test]
fn test_truncated_image() {
    let image = ImageBuilder::modern().build();
    let result = prepare_boot(
        &LoaderConfig::default(),
        &image[..0x300],
        0,
        &small_vm_map(),
        "",
    );

    assert!(matches!(
        result,
        Err(BootError::Kernel(KernelError::TruncatedImage {
            len: 0x300,
            needed: 0xa00,
        }))
    ));
}

#[test]
fn test_fixed_kernel_outside_memory_map() {
    let image = ImageBuilder::new(0x0204).build();
    let map = [MemoryRange::usable(0x40_0000, 0x1000_0000)];
    let mut platform = MockPlatform::uefi();

    let result = boot_linux_kernel(
        &mut platform,
        &LoaderConfig::default(),
        &image,
        None,
        &map,
        CMDLINE,
    );

    assert_eq!(
        result.map(|_| ()),
        Err(BootError::Memory(MemoryError::NoUsableRegion {
            what: RegionKind::Kernel,
            size: 0x1000,
        }))
    );
    assert!(platform.writes.is_empty());
}

#[test]
fn test_no_entry_method_touches_nothing() {
    let image = ImageBuilder::new(0x020c)
        .relocatable(0x20_0000)
        .xloadflags(XLoadFlags::KERNEL_64)
        .build();
    let mut platform = MockPlatform::with_caps(PlatformCapabilities {
        efi: None,
        long_mode: false,
        protected_mode: false,
    });

    let result = boot_linux_kernel(
        &mut platform,
        &LoaderConfig::default(),
        &image,
        Some(&[1, 2, 3]),
        &small_vm_map(),
        CMDLINE,
    );

    assert_eq!(
        result.map(|_| ()),
        Err(BootError::Handoff(HandoffError::NoSupportedEntryMethod))
    );
    assert!(platform.writes.is_empty());
}

#[test]
fn test_relocatable_scenario_2mib_alignment() {
    let image = ImageBuilder::new(0x0203).relocatable(0x20_0000).build();
    let prepared =
        prepare_boot(&LoaderConfig::default(), &image, 0, &small_vm_map(), CMDLINE).unwrap();

    assert!(prepared.caps.relocatable);
    assert_eq!(prepared.plan.preferred_address, 0x10_0000);
    assert_eq!(prepared.plan.kernel.start, 0x20_0000);
    assert!(prepared.plan.is_relocated());
}

#[test]
fn test_relocatable_scenario_1mib_alignment() {
    let image = ImageBuilder::new(0x0203).relocatable(0x10_0000).build();
    let prepared =
        prepare_boot(&LoaderConfig::default(), &image, 0, &small_vm_map(), CMDLINE).unwrap();

    assert_eq!(prepared.plan.kernel.start, 0x10_0000);
    assert!(!prepared.plan.is_relocated());
}

#[test]
fn test_2_02_relocatable_byte_is_ignored() {
    let image = ImageBuilder::new(0x0202).relocatable(0x20_0000).build();
    let prepared =
        prepare_boot(&LoaderConfig::default(), &image, 0, &small_vm_map(), CMDLINE).unwrap();

    assert!(!prepared.caps.relocatable);
    assert_eq!(prepared.plan.kernel.start, 0x10_0000);
    assert_eq!(prepared.plan.kernel_alignment, None);
}

#[test]
fn test_version_1_headers_get_no_optional_capabilities() {
    let image = ImageBuilder::new(0x0100)
        .relocatable(0x20_0000)
        .xloadflags(XLoadFlags::all())
        .handover_offset(0x190)
        .build();

    let kernel = KernelImage::parse(&image).unwrap();
    let caps = negotiate(kernel.header());
    assert!(!caps.relocatable);
    assert!(caps.xloadflags.is_empty());
    assert_eq!(caps.handover_offset, None);
}

#[test]
fn test_cmdline_over_limit_is_truncated() {
    let image = ImageBuilder::modern().cmdline_size(16).build();
    let cmdline = "0123456789abcdefX";
    let prepared =
        prepare_boot(&LoaderConfig::default(), &image, 0, &small_vm_map(), cmdline).unwrap();

    assert_eq!(
        prepared.warning,
        Some(ParamWarning::CommandLineTruncated {
            requested: 17,
            kept: 16,
        })
    );
    assert_eq!(prepared.params.cmdline(), b"0123456789abcdef\0");
}

#[test]
fn test_cmdline_at_limit_is_kept() {
    let image = ImageBuilder::modern().cmdline_size(16).build();
    let cmdline = "0123456789abcdef";
    let prepared =
        prepare_boot(&LoaderConfig::default(), &image, 0, &small_vm_map(), cmdline).unwrap();

    assert_eq!(prepared.warning, None);
    assert_eq!(prepared.params.cmdline(), b"0123456789abcdef\0");
}

#[test]
fn test_e820_from_uefi_map() {
    let image = ImageBuilder::modern().build();
    let prepared =
        prepare_boot(&LoaderConfig::default(), &image, 0, &uefi_map(), CMDLINE).unwrap();
    let page = prepared.params.zero_page();

    assert_eq!(page[0x1e8], 6);
    let e820_type = |i: usize| {
        let off = 0x2d0 + i * 20 + 16;
        u32::from_le_bytes(page[off..off + 4].try_into().unwrap())
    };
    assert_eq!(
        (0..6).map(e820_type).collect::<Vec<_>>(),
        vec![1, 2, 1, 1, 3, 1]
    );
}

#[test]
fn test_loader_data_is_not_placed_into() {
    // Only loader data below 4G besides the first page
    let map = [
        MemoryRange::from_uefi_pages(7, 0x1000, 0x10),
        MemoryRange::from_uefi_pages(2, 0x10_0000, 0x1000),
    ];
    let image = ImageBuilder::modern()
        .xloadflags(XLoadFlags::KERNEL_64)
        .build();

    let result = prepare_boot(&LoaderConfig::default(), &image, 0, &map, CMDLINE);
    assert!(matches!(
        result,
        Err(BootError::Memory(MemoryError::NoUsableRegion {
            what: RegionKind::Kernel,
            ..
        }))
    ));
}
