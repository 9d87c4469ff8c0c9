//! Contract between the file engine and the processor emulator that calls it.

/// What the engine needs from the emulated machine at a BDOS call.
///
/// The emulator traps the call at its BDOS entry point and hands itself to
/// [`FileEngine::dispatch`](super::FileEngine::dispatch).
pub trait BdosMachine {
    /// Flat guest memory.
    fn memory(&mut self) -> &mut [u8];

    /// Function number (register C).
    fn function(&self) -> u8;

    /// FCB address (register pair DE).
    fn fcb_address(&self) -> u16;

    /// Current transfer buffer address, set by BDOS function 26.
    fn dma_address(&self) -> u16;

    /// Store a 16-bit result in HL, mirrored into A (low) and B (high).
    fn set_result(&mut self, hl: u16);
}

/// Plain memory and registers, enough to drive the engine without a CPU.
#[derive(Debug, Clone)]
pub struct FlatMachine {
    pub memory: Vec<u8>,
    pub c: u8,
    pub de: u16,
    pub dma: u16,
    pub hl: u16,
    pub a: u8,
    pub b: u8,
}

impl FlatMachine {
    /// 64K of zeroed memory with the DMA buffer at its CP/M default.
    pub fn new() -> Self {
        Self {
            memory: vec![0; 0x10000],
            c: 0,
            de: 0,
            dma: super::addr::DEFAULT_DMA,
            hl: 0,
            a: 0,
            b: 0,
        }
    }

    /// Load registers for a call.
    pub fn call(&mut self, function: u8, de: u16) {
        self.c = function;
        self.de = de;
    }
}

impl Default for FlatMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl BdosMachine for FlatMachine {
    fn memory(&mut self) -> &mut [u8] {
        &mut self.memory
    }

    fn function(&self) -> u8 {
        self.c
    }

    fn fcb_address(&self) -> u16 {
        self.de
    }

    fn dma_address(&self) -> u16 {
        self.dma
    }

    fn set_result(&mut self, hl: u16) {
        self.hl = hl;
        self.a = (hl & 0xFF) as u8;
        self.b = (hl >> 8) as u8;
    }
}
