//! Sample driver module, exported through `declare_driver!`.
//!
//! `bind` refuses a device without a service name and `init` refuses the
//! `sample_broken` service, so both failure paths can be driven from a host.

use hdf_core::{DeviceDescriptor, HdfError, HdfResult};
use hdf_devhost::DriverEntry;

/// Service name whose `init` always fails.
pub const BROKEN_SERVICE: &str = "sample_broken";

struct SampleDriver;

impl DriverEntry for SampleDriver {
    fn module_name(&self) -> &str {
        "hdf_sample_driver"
    }

    fn bind(&self, device: &DeviceDescriptor) -> HdfResult<()> {
        if device.service_name().is_empty() {
            return Err(HdfError::InvalidParam);
        }
        Ok(())
    }

    fn init(&self, device: &DeviceDescriptor) -> HdfResult<()> {
        if device.service_name() == BROKEN_SERVICE {
            return Err(HdfError::Io);
        }
        Ok(())
    }

    fn release(&self, _device: &DeviceDescriptor) {}
}

hdf_devhost::declare_driver!(SampleDriver);
