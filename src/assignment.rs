//! Assignment of node-local processes to devices
use crate::types::{Error, Result};

/// The device a process is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceAssignment {
    /// Device id, in `0..devices`
    pub device: usize,
    /// Whether this process talks to the device on behalf of its group
    pub leader: bool,
    /// Devices on the node that no process is bound to
    pub unused_devices: usize,
}

/// Bind node-local rank `local_rank` of `local_size` processes to one of
/// `devices` devices.
///
/// With at least as many devices as processes every process gets its own
/// device. Otherwise the processes are cut into `devices` contiguous groups
/// whose sizes differ by at most one, the larger groups first, and the first
/// process of each group leads it.
pub fn assign_device(local_size: usize, devices: usize, local_rank: usize) -> Result<DeviceAssignment> {
    if devices == 0 {
        return Err(Error::NoDevices {
            node: String::new(),
            rank: local_rank,
        });
    }
    if local_rank >= local_size {
        return Err(Error::LengthMismatch {
            rank: local_rank,
            declared: local_size,
            actual: local_rank + 1,
        });
    }

    if devices >= local_size {
        return Ok(DeviceAssignment {
            device: local_rank,
            leader: true,
            unused_devices: devices - local_size,
        });
    }

    let base = local_size / devices;
    let remainder = local_size % devices;
    let large = (base + 1) * remainder;

    let (device, position) = if local_rank < large {
        (local_rank / (base + 1), local_rank % (base + 1))
    } else {
        (
            (local_rank - large) / base + remainder,
            (local_rank - large) % base,
        )
    };
    Ok(DeviceAssignment {
        device,
        leader: position == 0,
        unused_devices: 0,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use itertools::Itertools;

    #[test]
    fn test_two_devices_four_processes() {
        let a = (0..4)
            .map(|r| assign_device(4, 2, r).unwrap())
            .collect::<Vec<_>>();
        assert_eq!(
            a.iter().map(|x| x.device).collect::<Vec<_>>(),
            vec![0, 0, 1, 1]
        );
        assert_eq!(
            a.iter().map(|x| x.leader).collect::<Vec<_>>(),
            vec![true, false, true, false]
        );
    }

    #[test]
    fn test_one_device_per_process() {
        for r in 0..3 {
            let a = assign_device(3, 3, r).unwrap();
            assert_eq!(a.device, r);
            assert!(a.leader);
            assert_eq!(a.unused_devices, 0);
        }
    }

    #[test]
    fn test_surplus_devices() {
        let a = assign_device(2, 5, 1).unwrap();
        assert_eq!(a.device, 1);
        assert!(a.leader);
        assert_eq!(a.unused_devices, 3);
    }

    #[test]
    fn test_uneven_groups() {
        // 7 processes on 3 devices: groups of 3, 2, 2
        let devices = (0..7)
            .map(|r| assign_device(7, 3, r).unwrap().device)
            .collect::<Vec<_>>();
        assert_eq!(devices, vec![0, 0, 0, 1, 1, 2, 2]);
    }

    #[test]
    fn test_no_devices() {
        assert!(matches!(
            assign_device(4, 0, 0),
            Err(Error::NoDevices { .. })
        ));
    }

    #[test]
    fn test_partition_properties() {
        for size in 1..24 {
            for devices in 1..=size {
                let a = (0..size)
                    .map(|r| assign_device(size, devices, r).unwrap())
                    .collect::<Vec<_>>();
                for x in &a {
                    assert!(x.device < devices);
                }
                // groups are contiguous
                for (x, y) in a.iter().tuple_windows() {
                    assert!(y.device == x.device || y.device == x.device + 1);
                }
                let counts = a.iter().counts_by(|x| x.device);
                assert_eq!(counts.len(), devices);
                let min = counts.values().min().unwrap();
                let max = counts.values().max().unwrap();
                assert!(max - min <= 1);
                for d in 0..devices {
                    let leaders = a.iter().filter(|x| x.device == d && x.leader).count();
                    assert_eq!(leaders, 1);
                    let first = a.iter().position(|x| x.device == d).unwrap();
                    assert!(a[first].leader);
                }
            }
        }
    }
}
