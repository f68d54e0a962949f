//! SCPI drivers for the physical instruments.

pub mod santec_mpm;
pub mod santec_tsl;
pub mod scpi_spu;

pub use santec_mpm::SantecMpm;
pub use santec_tsl::SantecTsl;
pub use scpi_spu::ScpiSpu;
