use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{Directory, DirectoryError, Instance};
use crate::journal::{journal, Journal};
use crate::messages::{Address, Envelope, InstanceId};

type Inbox = mpsc::UnboundedSender<Envelope>;

struct HubTable {
    services: HashMap<String, BTreeMap<InstanceId, Inbox>>,
}

impl HubTable {
    fn instances<'a>(&'a mut self, service: &str)
        -> Option<&'a mut BTreeMap<InstanceId, Inbox>>
    {
        self.services.get_mut(service)
    }
}

/// In-process stand-in for the messaging layer. Every clone shares the
/// same registry; broadcasts reach every instance of the service,
/// the sender included.
#[derive(Clone)]
pub struct LocalHub {
    table: Arc<Mutex<HubTable>>,
    traffic: Journal<Envelope>,
}

impl LocalHub {
    pub fn new() -> Self {
        LocalHub {
            table: Arc::new(Mutex::new(HubTable { services: HashMap::new() })),
            traffic: journal(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubTable> {
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// A fresh, not yet registered client of this hub.
    pub fn connect(&self) -> LocalDirectory {
        let (tx, rx) = mpsc::unbounded_channel();
        LocalDirectory {
            hub: self.clone(),
            inbox: Some(tx),
            rx,
            registration: None,
        }
    }

    /// Every message this hub has delivered, in routing order.
    pub fn traffic(&self) -> Journal<Envelope> {
        self.traffic.clone()
    }

    pub fn instances(&self, service: &str) -> Vec<Instance> {
        let mut table = self.lock();
        match table.instances(service) {
            Some(instances) => instances.keys()
                .map(|id| Instance { id: id.clone(), service: service.to_string() })
                .collect(),
            None => Vec::new(),
        }
    }

    fn insert(&self, service: &str, id: InstanceId, inbox: Inbox) {
        self.lock().services
            .entry(service.to_string())
            .or_default()
            .insert(id, inbox);
    }

    fn remove(&self, service: &str, id: &InstanceId) {
        if let Some(instances) = self.lock().instances(service) {
            instances.remove(id);
        }
    }

    fn deliver(&self, message: Envelope) -> Result<(), DirectoryError> {
        let id = message.to.instance_id().cloned()
            .ok_or_else(|| DirectoryError::NotAnInstance(message.to.clone()))?;
        {
            let mut table = self.lock();
            let instances = table.instances(message.to.service_name())
                .ok_or_else(|| DirectoryError::UnknownInstance(message.to.clone()))?;
            let inbox = instances.get(&id)
                .ok_or_else(|| DirectoryError::UnknownInstance(message.to.clone()))?;
            if inbox.send(message.clone()).is_err() {
                // receiver went away without deregistering
                instances.remove(&id);
                return Err(DirectoryError::UnknownInstance(message.to));
            }
        }
        self.traffic.append(message);
        Ok(())
    }

    fn deliver_all(&self, message: Envelope) -> usize {
        let delivered = {
            let mut table = self.lock();
            match table.instances(message.to.service_name()) {
                Some(instances) => {
                    instances.retain(|_, inbox| inbox.send(message.clone()).is_ok());
                    instances.len()
                }
                None => 0,
            }
        };
        self.traffic.append(message);
        delivered
    }
}

impl Default for LocalHub {
    fn default() -> Self {
        LocalHub::new()
    }
}

struct Registration {
    id: InstanceId,
    service: String,
}

pub struct LocalDirectory {
    hub: LocalHub,
    // handed to the hub on registration
    inbox: Option<Inbox>,
    rx: mpsc::UnboundedReceiver<Envelope>,
    registration: Option<Registration>,
}

impl LocalDirectory {
    fn registered(&self) -> Result<&Registration, DirectoryError> {
        self.registration.as_ref().ok_or(DirectoryError::NotRegistered)
    }
}

impl Directory for LocalDirectory {
    async fn register(&mut self, service: &str, version: &str)
        -> Result<InstanceId, DirectoryError>
    {
        if let Some(registration) = &self.registration {
            return Err(DirectoryError::AlreadyRegistered(registration.id.clone()));
        }
        // a directory that was shut down cannot come back
        let inbox = self.inbox.take().ok_or(DirectoryError::Closed)?;

        let id = InstanceId::random();
        self.hub.insert(service, id.clone(), inbox);
        debug!(%id, service, version, "registered local instance");

        self.registration = Some(Registration {
            id: id.clone(),
            service: service.to_string(),
        });
        Ok(id)
    }

    fn instance_id(&self) -> Option<&InstanceId> {
        self.registration.as_ref().map(|r| &r.id)
    }

    async fn presence(&mut self, service: &str)
        -> Result<Vec<Instance>, DirectoryError>
    {
        Ok(self.hub.instances(service))
    }

    async fn send(&mut self, message: Envelope) -> Result<(), DirectoryError> {
        self.registered()?;
        trace!(mid = %message.mid, to = %message.to, "local send");
        self.hub.deliver(message)
    }

    async fn broadcast(&mut self, message: Envelope) -> Result<(), DirectoryError> {
        self.registered()?;
        let mid = message.mid.clone();
        let delivered = self.hub.deliver_all(message);
        trace!(%mid, delivered, "local broadcast");
        Ok(())
    }

    async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    async fn shutdown(&mut self) -> Result<(), DirectoryError> {
        if let Some(Registration { id, service }) = self.registration.take() {
            self.hub.remove(&service, &id);
            debug!(%id, service, "deregistered local instance");
        }
        self.inbox = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Body;

    fn token(to: Address, from: Address) -> Envelope {
        Envelope::hot_potato(to, from, &Body::HotPotato { expiration: 0 })
    }

    #[tokio::test]
    async fn presence_lists_every_registered_instance() {
        let hub = LocalHub::new();
        let mut a = hub.connect();
        let mut b = hub.connect();
        let mut other = hub.connect();
        let a_id = a.register("hpp", "1").await.unwrap();
        let b_id = b.register("hpp", "1").await.unwrap();
        other.register("chat", "1").await.unwrap();

        let mut ids: Vec<_> = a.presence("hpp").await.unwrap()
            .into_iter().map(|i| i.id).collect();
        ids.sort();
        let mut expected = vec![a_id, b_id];
        expected.sort();
        assert_eq!(ids, expected);
        assert!(a.presence("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_reaches_only_the_addressed_instance() {
        let hub = LocalHub::new();
        let mut a = hub.connect();
        let mut b = hub.connect();
        let a_id = a.register("hpp", "1").await.unwrap();
        let b_id = b.register("hpp", "1").await.unwrap();

        let msg = token(Address::instance(b_id, "hpp"), Address::instance(a_id, "hpp"));
        a.send(msg.clone()).await.unwrap();
        assert_eq!(b.recv().await, Some(msg));
        assert!(a.rx.try_recv().is_err());
        assert_eq!(hub.traffic().len(), 1);
    }

    #[tokio::test]
    async fn broadcast_includes_the_sender() {
        let hub = LocalHub::new();
        let mut a = hub.connect();
        let mut b = hub.connect();
        let a_id = a.register("hpp", "1").await.unwrap();
        b.register("hpp", "1").await.unwrap();

        let msg = token(Address::service("hpp"), Address::instance(a_id, "hpp"));
        a.broadcast(msg.clone()).await.unwrap();
        assert_eq!(a.recv().await, Some(msg.clone()));
        assert_eq!(b.recv().await, Some(msg));
    }

    #[tokio::test]
    async fn unknown_and_non_instance_destinations_fail() {
        let hub = LocalHub::new();
        let mut a = hub.connect();
        let a_id = a.register("hpp", "1").await.unwrap();
        let from = Address::instance(a_id, "hpp");

        let ghost = token(Address::instance(InstanceId::new("ghost"), "hpp"), from.clone());
        assert!(matches!(a.send(ghost).await, Err(DirectoryError::UnknownInstance(_))));

        let everyone = token(Address::service("hpp"), from);
        assert!(matches!(a.send(everyone).await, Err(DirectoryError::NotAnInstance(_))));
        assert!(hub.traffic().is_empty());
    }

    #[tokio::test]
    async fn shutdown_deregisters_and_ends_the_subscription() {
        let hub = LocalHub::new();
        let mut a = hub.connect();
        a.register("hpp", "1").await.unwrap();
        assert!(a.register("hpp", "1").await.is_err());

        a.shutdown().await.unwrap();
        assert!(hub.instances("hpp").is_empty());
        assert_eq!(a.recv().await, None);
        assert!(matches!(a.register("hpp", "1").await, Err(DirectoryError::Closed)));
    }

    #[tokio::test]
    async fn unregistered_clients_cannot_send() {
        let hub = LocalHub::new();
        let mut a = hub.connect();
        let msg = token(Address::service("hpp"), Address::service("hpp"));
        assert!(matches!(a.broadcast(msg).await, Err(DirectoryError::NotRegistered)));
    }
}
