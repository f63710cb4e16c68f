//! bzImage builder for tests

use ukistub_bootloader::boot::{BootHeader, LoadFlags, XLoadFlags};

const MAGIC_OFFSET: usize = 0x202;
const VERSION_OFFSET: usize = 0x206;

/// Builds a minimal image: boot sector, setup sectors with a header, body.
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    header: BootHeader,
    body: Vec<u8>,
}

impl ImageBuilder {
    /// Image at protocol `version`, loaded high, 4 setup sectors, 4 KiB body
    pub fn new(version: u16) -> Self {
        let mut raw = vec![0u8; 0x400];
        raw[0x1fe..0x200].copy_from_slice(&0xAA55u16.to_le_bytes());
        raw[MAGIC_OFFSET..MAGIC_OFFSET + 4].copy_from_slice(b"HdrS");
        raw[VERSION_OFFSET..VERSION_OFFSET + 2].copy_from_slice(&version.to_le_bytes());

        let mut header = BootHeader::decode(&raw).expect("valid header");
        header.setup_sects = 4;
        header.loadflags = LoadFlags::LOADED_HIGH;
        header.cmdline_size = 2047;
        header.initrd_addr_max = 0x7fff_ffff;

        Self {
            header,
            body: vec![0x90; 0x1000],
        }
    }

    /// 2.15 image with every modern capability
    pub fn modern() -> Self {
        Self::new(0x020f)
            .relocatable(0x20_0000)
            .xloadflags(
                XLoadFlags::KERNEL_64
                    | XLoadFlags::CAN_BE_LOADED_ABOVE_4G
                    | XLoadFlags::EFI_HANDOVER_64,
            )
            .handover_offset(0x190)
            .pref_address(0x100_0000)
    }

    pub fn relocatable(mut self, alignment: u32) -> Self {
        self.header.relocatable_kernel = 1;
        self.header.kernel_alignment = alignment;
        self
    }

    pub fn xloadflags(mut self, flags: XLoadFlags) -> Self {
        self.header.xloadflags = flags;
        self
    }

    pub fn handover_offset(mut self, offset: u32) -> Self {
        self.header.handover_offset = offset;
        self
    }

    pub fn pref_address(mut self, addr: u64) -> Self {
        self.header.pref_address = addr;
        self
    }

    #[allow(dead_code)]
    pub fn init_size(mut self, size: u32) -> Self {
        self.header.init_size = size;
        self
    }

    pub fn cmdline_size(mut self, size: u32) -> Self {
        self.header.cmdline_size = size;
        self
    }

    #[allow(dead_code)]
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    #[allow(dead_code)]
    pub fn header(&self) -> &BootHeader {
        &self.header
    }

    pub fn build(&self) -> Vec<u8> {
        let mut image = vec![0u8; self.header.setup_size()];
        image[0x1fe..0x200].copy_from_slice(&0xAA55u16.to_le_bytes());
        self.header
            .encode_into(&mut image)
            .expect("setup area holds the header");
        image.extend_from_slice(&self.body);
        image
    }
}
