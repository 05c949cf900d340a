//! Canonical full-system "machine" layer.
//!
//! Composes the physical memory, the CPU interpreter, and the device workers
//! into a single VM-like interface: build a [`Machine`] from a
//! [`MachineConfig`], load a boot image, [`start`](Machine::start) the device
//! threads, and drive the CPU with [`run`](Machine::run) or
//! [`run_slice`](Machine::run_slice) on the calling thread.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use corvus_cpu::{Cpu, Exception, IVT_BASE, IVT_END, SYSCALL_LINE};
use corvus_devices::{
    keyboard_pair, spawn_device, DeviceClass, DeviceRecord, DiskController, EnumPort, FrameSink,
    InterruptController, IrqLatch, IrqLine, MmioDevice, Monitor, NullSink, ScanCodeInjector,
    DISK_SLOTS,
};
use corvus_mem::{MemError, PhysMemory};
use thiserror::Error;
use tracing::debug;

/// Fixed physical addresses of the platform devices.
pub mod map {
    /// Device-enumeration port: command/status byte plus the record window.
    pub const ENUM_PORT_BASE: u32 = 0xF0000;
    /// Disk controller sector buffer.
    pub const DISK_BUF_BASE: u32 = 0xF1000;
    /// Disk controller command window.
    pub const DISK_CMD_BASE: u32 = 0xF1200;
    /// Interrupt controller control window (the IVT sits at `IVT_BASE`).
    pub const INTC_CTRL_BASE: u32 = 0xF2040;
    /// Keyboard handshake/scan-code window.
    pub const KEYBOARD_BASE: u32 = 0xF3000;
    /// Monitor framebuffer.
    pub const FRAMEBUFFER_BASE: u32 = 0x100000;
    /// Interrupt line wired to the keyboard.
    pub const KEYBOARD_LINE: u8 = 1;
}

#[derive(Debug, Error)]
pub enum MachineError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("boot image does not fit in memory: {0}")]
    BootImage(#[from] MemError),

    #[error("disk slot {0} is out of range")]
    DiskSlot(usize),

    #[error("machine already started")]
    AlreadyStarted,

    #[error("failed to spawn a device worker: {0}")]
    WorkerSpawn(#[from] std::io::Error),
}

/// Configuration for [`Machine`].
#[derive(Debug, Clone)]
pub struct MachineConfig {
    /// Physical memory size in bytes. Must cover the IVT and the windows of
    /// every enabled device.
    pub ram_size_bytes: u32,
    /// Attach the monitor (640×360 framebuffer at `map::FRAMEBUFFER_BASE`).
    pub enable_monitor: bool,
    /// Attach the keyboard at `map::KEYBOARD_BASE`.
    pub enable_keyboard: bool,
    /// Attach the disk controller at `map::DISK_CMD_BASE`.
    pub enable_disk: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            ram_size_bytes: 128 * 1024 * 1024,
            enable_monitor: true,
            enable_keyboard: true,
            enable_disk: true,
        }
    }
}

impl MachineConfig {
    fn validate(&self) -> Result<(), MachineError> {
        if self.ram_size_bytes < IVT_END {
            return Err(MachineError::InvalidConfig(
                "memory must cover the interrupt vector table",
            ));
        }
        if self.enable_keyboard && self.ram_size_bytes < map::KEYBOARD_BASE + 4 {
            return Err(MachineError::InvalidConfig(
                "memory must cover the keyboard window",
            ));
        }
        if self.enable_monitor {
            let fb_len = Monitor::DEFAULT_WIDTH * Monitor::DEFAULT_HEIGHT * 4;
            if self.ram_size_bytes < map::FRAMEBUFFER_BASE + fb_len + 1 {
                return Err(MachineError::InvalidConfig(
                    "memory must cover the framebuffer window",
                ));
            }
        }
        Ok(())
    }
}

/// Why a run loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// The instruction budget was exhausted.
    Completed { executed: u64 },
    /// The CPU faulted; the machine stays inspectable.
    Halted {
        exception: Exception,
        executed: u64,
    },
}

impl RunExit {
    pub fn executed(&self) -> u64 {
        match self {
            RunExit::Completed { executed } | RunExit::Halted { executed, .. } => *executed,
        }
    }
}

pub struct Machine {
    mem: Arc<PhysMemory>,
    cpu: Cpu,
    latch: IrqLatch,
    records: Vec<DeviceRecord>,
    keyboard: Option<ScanCodeInjector>,
    disk: Option<DiskController>,
    pending: Vec<Box<dyn MmioDevice>>,
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    started: bool,
}

impl Machine {
    /// Builds a machine that discards monitor frames.
    pub fn new(config: MachineConfig) -> Result<Self, MachineError> {
        Self::with_frame_sink(config, Box::new(NullSink))
    }

    /// Builds a machine delivering monitor frames to `sink`.
    pub fn with_frame_sink(
        config: MachineConfig,
        sink: Box<dyn FrameSink>,
    ) -> Result<Self, MachineError> {
        config.validate()?;

        let mem = Arc::new(PhysMemory::new(config.ram_size_bytes));
        let cpu = Cpu::new(Arc::clone(&mem));
        let latch = IrqLatch::new();

        let mut next_id = 0u8;
        let mut alloc_id = || {
            next_id += 1;
            next_id
        };

        let mut records = Vec::new();
        let mut pending: Vec<Box<dyn MmioDevice>> = Vec::new();

        // The memory "device" is a bare record: it exists so firmware can
        // discover the RAM size, and has no worker behind it.
        records.push(DeviceRecord {
            id: alloc_id(),
            class: DeviceClass::Memory,
            interrupt_line: 0,
            base_0: 0,
            limit_0: config.ram_size_bytes,
            base_1: 0,
            limit_1: 0,
        });

        let intc = InterruptController::new(
            alloc_id(),
            map::INTC_CTRL_BASE,
            IVT_BASE,
            IVT_END - IVT_BASE,
        );
        if let Some(record) = intc.record() {
            records.push(record);
        }
        pending.push(Box::new(intc));

        if config.enable_monitor {
            let monitor = Monitor::new(
                alloc_id(),
                map::FRAMEBUFFER_BASE,
                Monitor::DEFAULT_WIDTH,
                Monitor::DEFAULT_HEIGHT,
                sink,
            );
            if let Some(record) = monitor.record() {
                records.push(record);
            }
            pending.push(Box::new(monitor));
        }

        let keyboard = if config.enable_keyboard {
            let irq: Arc<dyn IrqLine> = Arc::new(latch.clone());
            let (kb, injector) = keyboard_pair(
                alloc_id(),
                map::KEYBOARD_BASE,
                map::KEYBOARD_LINE,
                irq,
            );
            if let Some(record) = kb.record() {
                records.push(record);
            }
            pending.push(Box::new(kb));
            Some(injector)
        } else {
            None
        };

        let disk = if config.enable_disk {
            let disk = DiskController::new(alloc_id(), map::DISK_CMD_BASE, map::DISK_BUF_BASE);
            if let Some(record) = disk.record() {
                records.push(record);
            }
            Some(disk)
        } else {
            None
        };

        pending.push(Box::new(EnumPort::new(
            map::ENUM_PORT_BASE,
            records.clone(),
        )));

        Ok(Self {
            mem,
            cpu,
            latch,
            records,
            keyboard,
            disk,
            pending,
            stop: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
            started: false,
        })
    }

    pub fn mem(&self) -> &Arc<PhysMemory> {
        &self.mem
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    /// Records the enumeration port will answer with.
    pub fn records(&self) -> &[DeviceRecord] {
        &self.records
    }

    /// Host-side scan-code injector, when the keyboard is enabled.
    pub fn keyboard(&self) -> Option<&ScanCodeInjector> {
        self.keyboard.as_ref()
    }

    /// Copies a raw boot image to the boot base. `ip` already points there.
    pub fn load_boot(&self, image: &[u8]) -> Result<(), MachineError> {
        self.mem.load_boot(image)?;
        Ok(())
    }

    /// Attaches a disk image to a slot. Only valid before [`start`](Self::start).
    pub fn set_disk(&mut self, slot: usize, image: Vec<u8>) -> Result<(), MachineError> {
        if slot >= DISK_SLOTS {
            return Err(MachineError::DiskSlot(slot));
        }
        let Some(disk) = self.disk.as_mut() else {
            return Err(if self.started {
                MachineError::AlreadyStarted
            } else {
                MachineError::InvalidConfig("disk controller is disabled")
            });
        };
        disk.set_disk(slot, Some(image));
        Ok(())
    }

    /// Resets every device's power-on registers and spawns the worker
    /// threads. Call once, after boot image and disks are in place.
    pub fn start(&mut self) -> Result<(), MachineError> {
        if self.started {
            return Err(MachineError::AlreadyStarted);
        }
        self.started = true;

        if let Some(disk) = self.disk.take() {
            self.pending.push(Box::new(disk));
        }
        for dev in &mut self.pending {
            dev.reset(&self.mem);
        }
        for dev in self.pending.drain(..) {
            self.workers
                .push(spawn_device(dev, Arc::clone(&self.mem), Arc::clone(&self.stop))?);
        }
        Ok(())
    }

    /// Delivers an interrupt directly, as a device host would. Not gated by
    /// the interrupt controller; the CPU still drops it while its interrupt
    /// flag is clear.
    pub fn interrupt(&mut self, line: u8) -> Result<(), Exception> {
        self.cpu.interrupt(line, 0)
    }

    /// Executes up to `budget` instructions, draining pending interrupt
    /// lines after each one.
    pub fn run_slice(&mut self, budget: u64) -> RunExit {
        let mut executed = 0;
        while executed < budget {
            if let Err(exception) = self.cpu.step() {
                debug!(%exception, "cpu halted");
                return RunExit::Halted {
                    exception,
                    executed,
                };
            }
            executed += 1;

            if let Err(exception) = self.drain_interrupts() {
                debug!(%exception, "cpu halted during interrupt entry");
                return RunExit::Halted {
                    exception,
                    executed,
                };
            }
        }
        RunExit::Completed { executed }
    }

    /// Runs until the CPU halts.
    pub fn run(&mut self) -> RunExit {
        const SLICE: u64 = 100_000;
        let mut total = 0;
        loop {
            match self.run_slice(SLICE) {
                RunExit::Completed { executed } => total += executed,
                RunExit::Halted {
                    exception,
                    executed,
                } => {
                    return RunExit::Halted {
                        exception,
                        executed: total + executed,
                    }
                }
            }
        }
    }

    /// Hardware lines latched by devices, filtered through the interrupt
    /// controller's enable/mask registers. Dropped lines are gone; there is
    /// no queue.
    fn drain_interrupts(&mut self) -> Result<(), Exception> {
        let pending = self.latch.take();
        if pending == 0 {
            return Ok(());
        }
        for line in 0..16u8 {
            if pending & (1 << line) == 0 {
                continue;
            }
            if line != SYSCALL_LINE
                && !InterruptController::allows(&self.mem, map::INTC_CTRL_BASE, line)
            {
                continue;
            }
            self.cpu.interrupt(line, 0)?;
        }
        Ok(())
    }
}

impl Drop for Machine {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
