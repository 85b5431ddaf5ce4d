//! Process-wide engine state shared by all solver instances
use crate::traits::{Group, SolveEngine};
use crate::types::{Error, Result};
use log::debug;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// The engine of one process and the resources its solvers share.
///
/// Every solver on a process holds a clone of the same `Rc`. The first
/// leader instance to attach starts the engine and creates the shared
/// resources; the last leader instance to detach destroys them and shuts the
/// engine down.
pub struct EngineRuntime<E: SolveEngine> {
    engine: E,
    instances: Cell<usize>,
    leaders: Cell<usize>,
    resources: RefCell<Option<E::Resources>>,
}

impl<E: SolveEngine> EngineRuntime<E> {
    /// Create a runtime around an engine
    pub fn new(engine: E) -> Rc<Self> {
        Rc::new(Self {
            engine,
            instances: Cell::new(0),
            leaders: Cell::new(0),
            resources: RefCell::new(None),
        })
    }

    /// The engine
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Number of live solver instances
    pub fn instances(&self) -> usize {
        self.instances.get()
    }

    /// Number of live solver instances leading a device group
    pub fn leaders(&self) -> usize {
        self.leaders.get()
    }

    /// Whether the engine is running
    pub fn is_running(&self) -> bool {
        self.leaders.get() > 0
    }

    /// Whether the shared resources exist
    pub fn has_resources(&self) -> bool {
        self.resources.borrow().is_some()
    }

    pub(crate) fn register(&self) {
        self.instances.set(self.instances.get() + 1);
    }

    pub(crate) fn unregister(&self) {
        self.instances.set(self.instances.get().saturating_sub(1));
    }

    /// Attach a leader instance, starting the engine for the first one
    pub(crate) fn attach(&self) -> Result<()> {
        if self.leaders.get() == 0 {
            debug!("Starting the solve engine");
            self.engine.initialize()?;
        }
        self.leaders.set(self.leaders.get() + 1);
        Ok(())
    }

    /// Create the shared resources unless an earlier instance did
    pub(crate) fn ensure_resources<G: Group>(
        &self,
        config: &E::Config,
        group: &G,
        device: usize,
    ) -> Result<()> {
        let mut resources = self.resources.borrow_mut();
        if resources.is_none() {
            *resources = Some(self.engine.create_resources(config, group, device)?);
        }
        Ok(())
    }

    /// Run `f` with the shared resources
    pub(crate) fn with_resources<R>(
        &self,
        f: impl FnOnce(&E, &E::Resources) -> Result<R>,
    ) -> Result<R> {
        let resources = self.resources.borrow();
        match resources.as_ref() {
            Some(r) => f(&self.engine, r),
            None => Err(Error::Engine(
                "the shared resources have not been created".to_string(),
            )),
        }
    }

    /// Detach a leader instance and release its configuration.
    ///
    /// The last leader also releases the shared resources, before its
    /// configuration, and shuts the engine down. Every step runs even if an
    /// earlier one fails; the first error is returned.
    pub(crate) fn detach(&self, config: E::Config) -> Result<()> {
        self.leave(Some(config))
    }

    /// Undo an [`attach`](Self::attach) whose instance never got a
    /// configuration
    pub(crate) fn abandon(&self) -> Result<()> {
        self.leave(None)
    }

    fn leave(&self, config: Option<E::Config>) -> Result<()> {
        let leaders = self.leaders.get().saturating_sub(1);
        self.leaders.set(leaders);
        if leaders > 0 {
            return config.map_or(Ok(()), |c| self.engine.destroy_config(c));
        }
        let mut result = Ok(());
        if let Some(r) = self.resources.borrow_mut().take() {
            result = self.engine.destroy_resources(r);
        }
        if let Some(c) = config {
            result = result.and(self.engine.destroy_config(c));
        }
        debug!("Shutting the solve engine down");
        result.and(self.engine.finalize())
    }
}
