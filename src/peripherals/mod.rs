//! Memory-mapped peripherals: UART, interrupt controller, timer, keyboard
//! and mouse. Each is a plain register file behind the bus device contract;
//! IRQ-capable devices latch a pending flag that the bus funnels into the
//! PIC at the end of every tick.

pub mod keyboard;
pub mod mouse;
pub mod pic;
pub mod timer;
pub mod uart;

pub use keyboard::KeyboardDevice;
pub use mouse::MouseDevice;
pub use pic::PicDevice;
pub use timer::TimerDevice;
pub use uart::UartDevice;
