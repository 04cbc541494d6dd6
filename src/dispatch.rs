use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use tracing::{debug, error, info, trace, warn};

use crate::messenger::Messenger;
use crate::pipeline::{Listener, Message, Responder, Transformer};

/// Runs every inbound message through the stage pipeline: listeners
/// fan out concurrently, responders run in order until one answers,
/// transformers rewrite the answer in order, and the result goes back
/// out through the messenger.
///
/// Stage collections are fixed at construction; registration never
/// races with dispatch.
pub struct Dispatcher {
    listeners: Vec<Arc<dyn Listener>>,
    responders: Vec<Arc<dyn Responder>>,
    transformers: Vec<Arc<dyn Transformer>>,
    messenger: Arc<dyn Messenger>,
}

impl Dispatcher {
    pub fn new(
        listeners: Vec<Arc<dyn Listener>>,
        responders: Vec<Arc<dyn Responder>>,
        transformers: Vec<Arc<dyn Transformer>>,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        Self {
            listeners,
            responders,
            transformers,
            messenger,
        }
    }

    /// Connect the messenger and dispatch inbound messages until the
    /// stream closes.
    ///
    /// Each message gets its own spawned cycle, so a slow stage delays
    /// only that message, never the ones behind it.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        info!("Initializing dispatch engine");
        let connected = self
            .messenger
            .connect()
            .await
            .context("Failed to connect messenger")?;
        if !connected {
            warn!("Unable to connect to messenger");
            return Ok(());
        }
        trace!("Connected");

        let mut inbound = self
            .messenger
            .subscribe()
            .await
            .context("Messenger yielded no inbound stream")?;

        while let Some(message) = inbound.recv().await {
            let engine = Arc::clone(&self);
            tokio::spawn(async move {
                engine.dispatch(message).await;
            });
        }

        info!("Inbound stream closed, dispatch engine stopping");
        Ok(())
    }

    /// One full Listen -> Respond -> Transform -> Send cycle.
    pub async fn dispatch(&self, message: Message) {
        trace!("Processing listeners");
        let message_ref = &message;
        let observations = self.listeners.iter().map(|listener| async move {
            (listener.name(), listener.observe(message_ref).await)
        });
        for (name, result) in join_all(observations).await {
            if let Err(e) = result {
                warn!("Listener {} failed: {:#}", name, e);
            }
        }
        trace!("Listeners have listened");

        trace!("Processing responders");
        let mut response = None;
        for responder in &self.responders {
            match responder.respond(&message).await {
                Ok(Some(r)) => {
                    trace!("Got a response from {}", responder.name());
                    response = Some(r);
                    break;
                }
                Ok(None) => {}
                Err(e) => {
                    // Treated as empty: the next responder still gets its turn.
                    warn!("Responder {} failed: {:#}", responder.name(), e);
                }
            }
        }
        trace!("Responders have responded");

        let Some(mut response) = response else {
            debug!("No response generated");
            return;
        };

        trace!("Processing transformers");
        for transformer in &self.transformers {
            let prior = response.clone();
            match transformer.transform(response).await {
                Ok(next) => response = next,
                Err(e) => {
                    // A failed transformer is identity: its input passes through.
                    warn!("Transformer {} failed: {:#}", transformer.name(), e);
                    response = prior;
                }
            }
        }
        trace!("Transformers have transformed");

        trace!("Sending response");
        if let Err(e) = self
            .messenger
            .send_message(&response.channel, &response.text, response.action)
            .await
        {
            error!("Failed to send response: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Response;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::{mpsc, Mutex};

    fn message(text: &str) -> Message {
        Message {
            channel: "#test".to_string(),
            user: "alice".to_string(),
            text: text.to_string(),
            action: false,
        }
    }

    /// Messenger double that records every outbound send.
    struct RecordingMessenger {
        connectable: bool,
        sent: Mutex<Vec<(String, String, bool)>>,
        inbound: Mutex<Option<mpsc::Receiver<Message>>>,
        subscriptions: AtomicUsize,
    }

    impl RecordingMessenger {
        fn new() -> Arc<Self> {
            Self::with_inbound(true).0
        }

        fn with_inbound(connectable: bool) -> (Arc<Self>, mpsc::Sender<Message>) {
            let (tx, rx) = mpsc::channel(8);
            let messenger = Arc::new(Self {
                connectable,
                sent: Mutex::new(Vec::new()),
                inbound: Mutex::new(Some(rx)),
                subscriptions: AtomicUsize::new(0),
            });
            (messenger, tx)
        }

        async fn sent(&self) -> Vec<(String, String, bool)> {
            self.sent.lock().await.clone()
        }
    }

    #[async_trait]
    impl Messenger for RecordingMessenger {
        async fn connect(&self) -> Result<bool> {
            Ok(self.connectable)
        }

        async fn disconnect(&self) {}

        async fn send_message(&self, channel: &str, text: &str, action: bool) -> Result<()> {
            self.sent
                .lock()
                .await
                .push((channel.to_string(), text.to_string(), action));
            Ok(())
        }

        async fn message_history(
            &self,
            _channel: &str,
            _user: Option<&str>,
        ) -> Result<Vec<Message>> {
            Ok(Vec::new())
        }

        async fn subscribe(&self) -> Option<mpsc::Receiver<Message>> {
            self.subscriptions.fetch_add(1, Ordering::SeqCst);
            self.inbound.lock().await.take()
        }
    }

    /// Listener double: sleeps, then increments the shared counter
    /// (or fails without incrementing).
    struct CountingListener {
        count: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Listener for CountingListener {
        fn name(&self) -> &str {
            "counting"
        }

        async fn observe(&self, _message: &Message) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail {
                return Err(anyhow!("listener boom"));
            }
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Responder double that snapshots the listener counter when invoked.
    struct ProbeResponder {
        counter: Arc<AtomicUsize>,
        observed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Responder for ProbeResponder {
        fn name(&self) -> &str {
            "probe"
        }

        async fn respond(&self, _message: &Message) -> Result<Option<Response>> {
            self.observed
                .store(self.counter.load(Ordering::SeqCst), Ordering::SeqCst);
            Ok(None)
        }
    }

    /// Responder double with a fixed reply (or failure), recording
    /// every invocation by name.
    struct ScriptedResponder {
        name: &'static str,
        reply: Option<&'static str>,
        fail: bool,
        invocations: Arc<Mutex<Vec<&'static str>>>,
    }

    impl ScriptedResponder {
        fn new(
            name: &'static str,
            reply: Option<&'static str>,
            invocations: &Arc<Mutex<Vec<&'static str>>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                name,
                reply,
                fail: false,
                invocations: Arc::clone(invocations),
            })
        }

        fn failing(
            name: &'static str,
            invocations: &Arc<Mutex<Vec<&'static str>>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                name,
                reply: None,
                fail: true,
                invocations: Arc::clone(invocations),
            })
        }
    }

    #[async_trait]
    impl Responder for ScriptedResponder {
        fn name(&self) -> &str {
            self.name
        }

        async fn respond(&self, message: &Message) -> Result<Option<Response>> {
            self.invocations.lock().await.push(self.name);
            if self.fail {
                return Err(anyhow!("{} blew up", self.name));
            }
            Ok(self.reply.map(|text| Response::to(message, text)))
        }
    }

    /// Transformer double appending a suffix (or failing).
    struct SuffixTransformer {
        suffix: &'static str,
        fail: bool,
    }

    #[async_trait]
    impl Transformer for SuffixTransformer {
        fn name(&self) -> &str {
            "suffix"
        }

        async fn transform(&self, mut response: Response) -> Result<Response> {
            if self.fail {
                return Err(anyhow!("transformer boom"));
            }
            response.text.push_str(self.suffix);
            Ok(response)
        }
    }

    fn dispatcher(
        listeners: Vec<Arc<dyn Listener>>,
        responders: Vec<Arc<dyn Responder>>,
        transformers: Vec<Arc<dyn Transformer>>,
        messenger: Arc<RecordingMessenger>,
    ) -> Dispatcher {
        Dispatcher::new(listeners, responders, transformers, messenger)
    }

    #[tokio::test]
    async fn all_listeners_complete_before_responders_run() {
        let counter = Arc::new(AtomicUsize::new(0));
        let observed = Arc::new(AtomicUsize::new(0));

        let listeners: Vec<Arc<dyn Listener>> = (0..3)
            .map(|_| {
                Arc::new(CountingListener {
                    count: Arc::clone(&counter),
                    fail: false,
                }) as Arc<dyn Listener>
            })
            .collect();
        let responders: Vec<Arc<dyn Responder>> = vec![Arc::new(ProbeResponder {
            counter: Arc::clone(&counter),
            observed: Arc::clone(&observed),
        })];

        let engine = dispatcher(listeners, responders, vec![], RecordingMessenger::new());
        engine.dispatch(message("hi")).await;

        assert_eq!(observed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn first_nonempty_responder_short_circuits() {
        let invocations = Arc::new(Mutex::new(Vec::new()));
        let responders: Vec<Arc<dyn Responder>> = vec![
            ScriptedResponder::new("r0", None, &invocations),
            ScriptedResponder::new("r1", Some("first answer"), &invocations),
            ScriptedResponder::new("r2", Some("never sent"), &invocations),
        ];

        let messenger = RecordingMessenger::new();
        let engine = dispatcher(vec![], responders, vec![], Arc::clone(&messenger));
        engine.dispatch(message("hi")).await;

        assert_eq!(*invocations.lock().await, vec!["r0", "r1"]);
        let sent = messenger.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "first answer");
    }

    #[tokio::test]
    async fn transformers_compose_sequentially_in_order() {
        let invocations = Arc::new(Mutex::new(Vec::new()));
        let responders: Vec<Arc<dyn Responder>> =
            vec![ScriptedResponder::new("r0", Some("base"), &invocations)];
        let transformers: Vec<Arc<dyn Transformer>> = vec![
            Arc::new(SuffixTransformer {
                suffix: "-a",
                fail: false,
            }),
            Arc::new(SuffixTransformer {
                suffix: "-b",
                fail: false,
            }),
        ];

        let messenger = RecordingMessenger::new();
        let engine = dispatcher(vec![], responders, transformers, Arc::clone(&messenger));
        engine.dispatch(message("hi")).await;

        assert_eq!(messenger.sent().await[0].1, "base-a-b");
    }

    #[tokio::test]
    async fn no_response_means_no_send() {
        let invocations = Arc::new(Mutex::new(Vec::new()));
        let responders: Vec<Arc<dyn Responder>> = vec![
            ScriptedResponder::new("r0", None, &invocations),
            ScriptedResponder::new("r1", None, &invocations),
        ];

        let messenger = RecordingMessenger::new();
        let engine = dispatcher(vec![], responders, vec![], Arc::clone(&messenger));
        engine.dispatch(message("hi")).await;

        assert!(messenger.sent().await.is_empty());
    }

    #[tokio::test]
    async fn failing_listener_does_not_abort_the_cycle() {
        let counter = Arc::new(AtomicUsize::new(0));
        let listeners: Vec<Arc<dyn Listener>> = vec![
            Arc::new(CountingListener {
                count: Arc::clone(&counter),
                fail: true,
            }),
            Arc::new(CountingListener {
                count: Arc::clone(&counter),
                fail: false,
            }),
        ];
        let invocations = Arc::new(Mutex::new(Vec::new()));
        let responders: Vec<Arc<dyn Responder>> =
            vec![ScriptedResponder::new("r0", Some("still here"), &invocations)];

        let messenger = RecordingMessenger::new();
        let engine = dispatcher(listeners, responders, vec![], Arc::clone(&messenger));
        engine.dispatch(message("hi")).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(messenger.sent().await[0].1, "still here");
    }

    #[tokio::test]
    async fn failing_responder_is_treated_as_empty() {
        let invocations = Arc::new(Mutex::new(Vec::new()));
        let responders: Vec<Arc<dyn Responder>> = vec![
            ScriptedResponder::failing("r0", &invocations),
            ScriptedResponder::new("r1", Some("recovered"), &invocations),
        ];

        let messenger = RecordingMessenger::new();
        let engine = dispatcher(vec![], responders, vec![], Arc::clone(&messenger));
        engine.dispatch(message("hi")).await;

        assert_eq!(*invocations.lock().await, vec!["r0", "r1"]);
        assert_eq!(messenger.sent().await[0].1, "recovered");
    }

    #[tokio::test]
    async fn failing_transformer_acts_as_identity() {
        let invocations = Arc::new(Mutex::new(Vec::new()));
        let responders: Vec<Arc<dyn Responder>> =
            vec![ScriptedResponder::new("r0", Some("base"), &invocations)];
        let transformers: Vec<Arc<dyn Transformer>> = vec![
            Arc::new(SuffixTransformer {
                suffix: "-a",
                fail: true,
            }),
            Arc::new(SuffixTransformer {
                suffix: "-b",
                fail: false,
            }),
        ];

        let messenger = RecordingMessenger::new();
        let engine = dispatcher(vec![], responders, transformers, Arc::clone(&messenger));
        engine.dispatch(message("hi")).await;

        assert_eq!(messenger.sent().await[0].1, "base-b");
    }

    #[tokio::test]
    async fn action_flag_survives_the_pipeline() {
        struct EmoteResponder;

        #[async_trait]
        impl Responder for EmoteResponder {
            fn name(&self) -> &str {
                "emote"
            }

            async fn respond(&self, message: &Message) -> Result<Option<Response>> {
                Ok(Some(Response::emote(message, "waves")))
            }
        }

        let messenger = RecordingMessenger::new();
        let engine = dispatcher(
            vec![],
            vec![Arc::new(EmoteResponder)],
            vec![],
            Arc::clone(&messenger),
        );
        engine.dispatch(message("hi")).await;

        let sent = messenger.sent().await;
        assert_eq!(sent[0], ("#test".to_string(), "waves".to_string(), true));
    }

    #[tokio::test]
    async fn failed_connect_never_subscribes() {
        let (messenger, _tx) = RecordingMessenger::with_inbound(false);
        let invocations = Arc::new(Mutex::new(Vec::new()));
        let responders: Vec<Arc<dyn Responder>> =
            vec![ScriptedResponder::new("r0", Some("unreachable"), &invocations)];

        let engine = Arc::new(dispatcher(vec![], responders, vec![], Arc::clone(&messenger)));
        engine.run().await.unwrap();

        assert_eq!(messenger.subscriptions.load(Ordering::SeqCst), 0);
        assert!(messenger.sent().await.is_empty());
    }

    #[tokio::test]
    async fn run_dispatches_each_inbound_message() {
        let (messenger, tx) = RecordingMessenger::with_inbound(true);
        let invocations = Arc::new(Mutex::new(Vec::new()));
        let responders: Vec<Arc<dyn Responder>> =
            vec![ScriptedResponder::new("r0", Some("pong"), &invocations)];

        let engine = Arc::new(dispatcher(vec![], responders, vec![], Arc::clone(&messenger)));
        let run = tokio::spawn(engine.run());

        tx.send(message("one")).await.unwrap();
        tx.send(message("two")).await.unwrap();
        drop(tx);
        run.await.unwrap().unwrap();

        // Cycles are spawned tasks; give them a moment to finish.
        for _ in 0..50 {
            if messenger.sent().await.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(messenger.sent().await.len(), 2);
        assert_eq!(messenger.subscriptions.load(Ordering::SeqCst), 1);
    }
}
