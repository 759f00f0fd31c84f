//! Binds a node state machine to a transport.

use crate::machine::NodeStateMachine;
use framelock_core::{Action, Event, StateMachine};
use framelock_messages::Message;
use framelock_transport::{Clock, Transport};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{trace, warn};

/// A node state machine plus the transport it talks through.
///
/// The runner owns all I/O: it feeds transport input to the machine as
/// events and carries out the actions the machine returns.
#[derive(Debug)]
pub struct ClusterNode<T: Transport> {
    machine: NodeStateMachine,
    transport: Option<T>,
    clock: Arc<dyn Clock>,
    /// Application payloads not yet taken by the host.
    app_inbox: VecDeque<Message>,
}

impl<T: Transport> ClusterNode<T> {
    pub fn new(machine: NodeStateMachine, transport: T) -> Self {
        let clock = transport.clock();
        Self {
            machine,
            transport: Some(transport),
            clock,
            app_inbox: VecDeque::new(),
        }
    }

    /// A node whose transport never started.
    pub fn without_transport(machine: NodeStateMachine, clock: Arc<dyn Clock>) -> Self {
        Self {
            machine,
            transport: None,
            clock,
            app_inbox: VecDeque::new(),
        }
    }

    pub fn machine(&self) -> &NodeStateMachine {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut NodeStateMachine {
        &mut self.machine
    }

    pub fn transport(&self) -> Option<&T> {
        self.transport.as_ref()
    }

    pub fn transport_mut(&mut self) -> Option<&mut T> {
        self.transport.as_mut()
    }

    pub fn now(&self) -> std::time::Duration {
        self.clock.now()
    }

    /// One host-loop iteration: tick, then everything the transport has
    /// received, then any delivery failures.
    pub fn step(&mut self, new_frame: bool) {
        self.dispatch(Event::Tick { new_frame });

        while let Some(message) = self.transport.as_ref().and_then(|t| t.try_next_received()) {
            self.dispatch(Event::MessageReceived(message));
        }

        let failures = self
            .transport
            .as_ref()
            .map(|t| t.take_delivery_failures())
            .unwrap_or_default();
        for failure in failures {
            self.dispatch(Event::DeliveryFailed {
                message_type: failure.message_type,
                sequence: failure.sequence,
                missing: failure.missing,
            });
        }
    }

    /// Feed one event to the machine and execute its actions.
    pub fn dispatch(&mut self, event: Event) {
        self.machine.set_time(self.clock.now());
        trace!(event = event.type_name(), "Dispatching");
        let actions = self.machine.handle(event);
        for action in actions {
            self.execute(action);
        }
    }

    fn execute(&mut self, action: Action) {
        match action {
            Action::Publish(message) => {
                let Some(transport) = &self.transport else {
                    trace!(message_type = %message.message_type, "No transport, dropping message");
                    return;
                };
                if let Err(e) = transport.publish(message.header(), message.payload) {
                    warn!(message_type = %message.message_type, error = %e, "Publish failed");
                }
            }
            Action::RegisterNode(node) => {
                if let Some(transport) = &self.transport {
                    let all = transport.register_node(node);
                    trace!(node = %node, all_nodes = %all, "Registered node");
                }
            }
            Action::UnregisterNode(node) => {
                if let Some(transport) = &self.transport {
                    let all = transport.unregister_node(node);
                    trace!(node = %node, all_nodes = %all, "Unregistered node");
                }
            }
            Action::DeliverAppData(message) => self.app_inbox.push_back(message),
        }
    }

    /// Next application payload, oldest first.
    pub fn next_app_message(&mut self) -> Option<Message> {
        self.app_inbox.pop_front()
    }

    /// Stop the transport if it is running.
    pub fn stop_transport(&mut self) {
        if let Some(transport) = &mut self.transport {
            transport.stop();
        }
    }
}
