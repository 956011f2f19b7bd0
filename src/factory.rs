use crate::client::ClientFactory;
use crate::clock::Clock;
use crate::config::Config;
use crate::session::Session;
use crate::target::{DynamicTargetProvider, FilesystemTargetProvider, Manager, TargetFlags};
use std::sync::Arc;

#[derive(Clone)]
pub struct Factory {
    config: Arc<Config>,
    session: Session,
    flags: TargetFlags,
    clients: Arc<dyn ClientFactory>,
    clock: Arc<dyn Clock>,
}

impl Factory {
    pub fn new(
        config: Config,
        session: Session,
        flags: TargetFlags,
        clients: Arc<dyn ClientFactory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            session,
            flags,
            clients,
            clock,
        }
    }

    pub fn manager(&self) -> Manager {
        let file = FilesystemTargetProvider::new(self.session.target_file());
        Manager::new(
            self.config.clone(),
            self.session.clone(),
            Box::new(DynamicTargetProvider::new(file, self.flags.clone())),
            self.flags.clone(),
            self.clients.clone(),
        )
    }

    /// Manager reading the persisted target only, for completion callbacks.
    pub fn file_manager(&self) -> Manager {
        let file = FilesystemTargetProvider::new(self.session.target_file());
        Manager::new(
            self.config.clone(),
            self.session.clone(),
            Box::new(file),
            TargetFlags::default(),
            self.clients.clone(),
        )
    }

    pub fn target_flags(&self) -> &TargetFlags {
        &self.flags
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::{FakeFactory, FakeGarden};
    use crate::clock::SystemClock;
    use crate::target::{Target, TargetProvider};

    #[tokio::test]
    async fn file_manager_ignores_flags() {
        let root = tempfile::tempdir().unwrap();
        let session = Session::create(root.path(), "s1").unwrap();
        FilesystemTargetProvider::new(session.target_file())
            .write(&Target::new("g", "p", "", ""))
            .unwrap();

        let factory = Factory::new(
            Config::default(),
            session,
            TargetFlags::new("", "", "", "web", false),
            Arc::new(FakeFactory(Arc::new(FakeGarden::default()))),
            Arc::new(SystemClock),
        );

        assert_eq!(
            factory.manager().current_target().unwrap(),
            Target::new("g", "p", "", "web")
        );
        assert_eq!(
            factory.file_manager().current_target().unwrap(),
            Target::new("g", "p", "", "")
        );
        assert!(factory.file_manager().target_flags().is_empty());
    }
}
