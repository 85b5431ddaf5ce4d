//! The nested process groups of a solver instance
use crate::assignment::{assign_device, DeviceAssignment};
use crate::traits::Group;
use crate::types::{resolve_device_count, Error, Mode, Result};
use log::{debug, warn};

/// Color of a process in the split producing the solve group
pub fn solve_group_color(assignment: &DeviceAssignment) -> Option<usize> {
    if assignment.leader {
        Some(0)
    } else {
        None
    }
}

/// Color of a process in the split producing the device groups
pub fn device_group_color(assignment: &DeviceAssignment) -> Option<usize> {
    Some(assignment.device)
}

/// Split the leaders off `global`; every other process gets `None`
pub fn split_solve_group<G: Group>(global: &G, assignment: &DeviceAssignment) -> Option<G> {
    global.split(solve_group_color(assignment), 0)
}

/// Split `node` into one group per device
pub fn split_device_group<G: Group>(node: &G, assignment: &DeviceAssignment) -> Result<G> {
    node.split(device_group_color(assignment), 0).ok_or_else(|| {
        Error::Topology(format!(
            "local rank {} has no group for device {}",
            node.rank(),
            assignment.device
        ))
    })
}

/// The groups a process belongs to.
///
/// * `global`: a copy of the group the instance was created on
/// * `node`: the processes sharing this node's memory
/// * `device_group`: the processes bound to this process's device; rank 0 is the leader
/// * `solve_group`: the leaders of all device groups; `None` on other processes
pub struct ProcessTopology<G: Group> {
    node_name: String,
    devices: usize,
    assignment: DeviceAssignment,
    global: G,
    node: G,
    device_group: G,
    solve_group: Option<G>,
}

impl<G: Group> ProcessTopology<G> {
    /// Build the groups on top of `comm`.
    ///
    /// `detected_devices` is the number of devices found on this node.
    /// Collective over `comm`.
    pub fn new(comm: &G, mode: Mode, detected_devices: usize) -> Result<Self> {
        let global = comm.duplicate();
        global.set_name("global");

        let node = global.split_shared();
        node.set_name("node");

        let node_name = global.processor_name();
        let devices = resolve_device_count(
            mode,
            detected_devices,
            node.size(),
            &node_name,
            global.rank(),
        )?;
        let assignment = assign_device(node.size(), devices, node.rank())?;
        if assignment.unused_devices > 0 && node.rank() == 0 {
            warn!(
                "Devices on the node {} are more than the processes launched. Only {} devices will be used.",
                node_name,
                node.size()
            );
        }

        global.barrier();

        let solve_group = split_solve_group(&global, &assignment);
        if let Some(group) = &solve_group {
            group.set_name("solve");
        }

        let device_group = split_device_group(&node, &assignment)?;
        device_group.set_name("device");

        global.barrier();

        debug!(
            "Rank {} on {}: local rank {}/{}, device {}, device rank {}/{}, leader {}",
            global.rank(),
            node_name,
            node.rank(),
            node.size(),
            assignment.device,
            device_group.rank(),
            device_group.size(),
            assignment.leader
        );

        Ok(Self {
            node_name,
            devices,
            assignment,
            global,
            node,
            device_group,
            solve_group,
        })
    }

    /// Name of the node this process runs on
    pub fn node_name(&self) -> &str {
        &self.node_name
    }
    /// Number of devices the node works with
    pub fn devices(&self) -> usize {
        self.devices
    }
    /// Device assignment of this process
    pub fn assignment(&self) -> &DeviceAssignment {
        &self.assignment
    }
    /// Device this process is bound to
    pub fn device(&self) -> usize {
        self.assignment.device
    }
    /// Whether this process leads its device group
    pub fn is_leader(&self) -> bool {
        self.assignment.leader
    }

    /// Copy of the caller's group
    pub fn global(&self) -> &G {
        &self.global
    }
    /// Processes on the same node
    pub fn node(&self) -> &G {
        &self.node
    }
    /// Processes bound to the same device
    pub fn device_group(&self) -> &G {
        &self.device_group
    }
    /// Leaders of all device groups, on leaders only
    pub fn solve_group(&self) -> Option<&G> {
        self.solve_group.as_ref()
    }

    /// Rank in the global group
    pub fn global_rank(&self) -> usize {
        self.global.rank()
    }
    /// Size of the global group
    pub fn global_size(&self) -> usize {
        self.global.size()
    }
    /// Rank on the node
    pub fn local_rank(&self) -> usize {
        self.node.rank()
    }
    /// Number of processes on the node
    pub fn local_size(&self) -> usize {
        self.node.size()
    }
    /// Rank in the device group
    pub fn device_rank(&self) -> usize {
        self.device_group.rank()
    }
    /// Size of the device group
    pub fn device_size(&self) -> usize {
        self.device_group.size()
    }
    /// Rank in the solve group, on leaders only
    pub fn solve_rank(&self) -> Option<usize> {
        self.solve_group.as_ref().map(|g| g.rank())
    }
    /// Size of the solve group, on leaders only
    pub fn solve_size(&self) -> Option<usize> {
        self.solve_group.as_ref().map(|g| g.size())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::comm::threaded::run;

    #[test]
    fn test_colors() {
        let leader = DeviceAssignment {
            device: 3,
            leader: true,
            unused_devices: 0,
        };
        let member = DeviceAssignment {
            leader: false,
            ..leader
        };
        assert_eq!(solve_group_color(&leader), Some(0));
        assert_eq!(solve_group_color(&member), None);
        assert_eq!(device_group_color(&member), Some(3));
    }

    #[test]
    fn test_four_processes_two_devices() {
        let results = run(&[4], |comm| {
            let t = ProcessTopology::new(&comm, Mode::dDDI, 2).unwrap();
            (
                t.device(),
                t.is_leader(),
                t.device_rank(),
                t.device_size(),
                t.solve_rank(),
                t.solve_size(),
            )
        });
        assert_eq!(results[0], (0, true, 0, 2, Some(0), Some(2)));
        assert_eq!(results[1], (0, false, 1, 2, None, None));
        assert_eq!(results[2], (1, true, 0, 2, Some(1), Some(2)));
        assert_eq!(results[3], (1, false, 1, 2, None, None));
    }

    #[test]
    fn test_two_nodes() {
        // node 0: 3 processes on 2 devices, node 1: 2 processes on 2 devices
        let results = run(&[3, 2], |comm| {
            let t = ProcessTopology::new(&comm, Mode::dDDI, 2).unwrap();
            (
                t.local_rank(),
                t.local_size(),
                t.device(),
                t.device_size(),
                t.solve_rank(),
                t.node_name().to_string(),
            )
        });
        assert_eq!(results[0], (0, 3, 0, 2, Some(0), "node0".to_string()));
        assert_eq!(results[1], (1, 3, 0, 2, None, "node0".to_string()));
        assert_eq!(results[2], (2, 3, 1, 1, Some(1), "node0".to_string()));
        assert_eq!(results[3], (0, 2, 0, 1, Some(2), "node1".to_string()));
        assert_eq!(results[4], (1, 2, 1, 1, Some(3), "node1".to_string()));
    }

    #[test]
    fn test_host_mode_uses_every_process() {
        let results = run(&[3], |comm| {
            let t = ProcessTopology::new(&comm, Mode::hDDI, 0).unwrap();
            (t.devices(), t.is_leader(), t.solve_size())
        });
        for r in results {
            assert_eq!(r, (3, true, Some(3)));
        }
    }

    #[test]
    fn test_surplus_devices() {
        let results = run(&[2], |comm| {
            let t = ProcessTopology::new(&comm, Mode::dDDI, 4).unwrap();
            (t.device(), t.assignment().unused_devices, t.device_size())
        });
        assert_eq!(results, vec![(0, 2, 1), (1, 2, 1)]);
    }

    #[test]
    fn test_no_devices() {
        let results = run(&[2], |comm| {
            ProcessTopology::new(&comm, Mode::dDDI, 0).err()
        });
        assert_eq!(
            results[1],
            Some(Error::NoDevices {
                node: "node0".to_string(),
                rank: 1
            })
        );
    }
}
