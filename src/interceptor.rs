//! Ordered middleware chains for the six lifecycle events a connection can
//! raise. Each chain is folded into a single boxed closure once, at
//! construction time, rather than walked link-by-link on every invocation.

use crate::error::Error;
use crate::event::ID;
use crate::message::Message;
use crate::request::HttpRequest;
use crate::stream::SocketFlowStream;
use futures::future::BoxFuture;
use std::sync::Arc;

pub type Next<In, Out> = Arc<dyn Fn(In) -> BoxFuture<'static, Out> + Send + Sync>;
pub type Interceptor<In, Out> = Arc<dyn Fn(In, Next<In, Out>) -> BoxFuture<'static, Out> + Send + Sync>;

/// Folds a list of interceptors into one callable chain: the first
/// registered interceptor runs first and receives a `next` continuation it
/// may call zero or more times (not calling it short-circuits the chain).
fn compose<In, Out>(
    interceptors: Vec<Interceptor<In, Out>>,
    terminal: Next<In, Out>,
) -> Next<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    interceptors
        .into_iter()
        .rev()
        .fold(terminal, |next, interceptor| {
            let interceptor = interceptor.clone();
            Arc::new(move |input: In| interceptor(input, next.clone())) as Next<In, Out>
        })
}

/// Raw accepted transport before the HTTP Upgrade is parsed; an interceptor
/// may reject it outright (e.g. IP allow-listing) by returning `Err`.
pub type OnAcceptStream = Interceptor<SocketFlowStream, Result<SocketFlowStream, Error>>;
/// The parsed upgrade request, before the 101 response is emitted.
pub type OnHandshake = Interceptor<HttpRequest, Result<HttpRequest, Error>>;
/// Fired once a connection reaches `Open`.
pub type OnConnect = Interceptor<ID, ()>;
/// Fired when a connection transitions to `Closed`/`Aborted`.
pub type OnClose = Interceptor<(ID, Option<u16>), ()>;
/// Fired for any error surfaced on a connection.
pub type OnError = Interceptor<(ID, Arc<Error>), ()>;
/// Fired for every fully assembled inbound message.
pub type OnMessage = Interceptor<(ID, Message), ()>;

fn noop_terminal<In: Send + 'static>() -> Next<In, ()> {
    Arc::new(|_input: In| Box::pin(async {}) as BoxFuture<'static, ()>)
}

fn passthrough_terminal<T: Send + 'static>() -> Next<T, Result<T, Error>> {
    Arc::new(|input: T| Box::pin(async move { Ok(input) }) as BoxFuture<'static, Result<T, Error>>)
}

/// Holds the composed chain for each of the six event kinds. Registration
/// only happens before `build()`; after that the chains are immutable.
#[derive(Default)]
pub struct InterceptorChainBuilder {
    on_accept_stream: Vec<OnAcceptStream>,
    on_handshake: Vec<OnHandshake>,
    on_connect: Vec<OnConnect>,
    on_close: Vec<OnClose>,
    on_error: Vec<OnError>,
    on_message: Vec<OnMessage>,
}

impl InterceptorChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_accept_stream(mut self, interceptor: OnAcceptStream) -> Self {
        self.on_accept_stream.push(interceptor);
        self
    }

    pub fn on_handshake(mut self, interceptor: OnHandshake) -> Self {
        self.on_handshake.push(interceptor);
        self
    }

    pub fn on_connect(mut self, interceptor: OnConnect) -> Self {
        self.on_connect.push(interceptor);
        self
    }

    pub fn on_close(mut self, interceptor: OnClose) -> Self {
        self.on_close.push(interceptor);
        self
    }

    pub fn on_error(mut self, interceptor: OnError) -> Self {
        self.on_error.push(interceptor);
        self
    }

    pub fn on_message(mut self, interceptor: OnMessage) -> Self {
        self.on_message.push(interceptor);
        self
    }

    pub fn build(self) -> InterceptorChain {
        InterceptorChain {
            on_accept_stream: compose(self.on_accept_stream, passthrough_terminal()),
            on_handshake: compose(self.on_handshake, passthrough_terminal()),
            on_connect: compose(self.on_connect, noop_terminal()),
            on_close: compose(self.on_close, noop_terminal()),
            on_error: compose(self.on_error, noop_terminal()),
            on_message: compose(self.on_message, noop_terminal()),
        }
    }
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("InterceptorChain { .. }")
    }
}

#[derive(Clone)]
pub struct InterceptorChain {
    on_accept_stream: Next<SocketFlowStream, Result<SocketFlowStream, Error>>,
    on_handshake: Next<HttpRequest, Result<HttpRequest, Error>>,
    on_connect: Next<ID, ()>,
    on_close: Next<(ID, Option<u16>), ()>,
    on_error: Next<(ID, Arc<Error>), ()>,
    on_message: Next<(ID, Message), ()>,
}

impl InterceptorChain {
    pub fn empty() -> Self {
        InterceptorChainBuilder::new().build()
    }

    pub async fn run_on_accept_stream(
        &self,
        stream: SocketFlowStream,
    ) -> Result<SocketFlowStream, Error> {
        (self.on_accept_stream)(stream).await
    }

    pub async fn run_on_handshake(&self, request: HttpRequest) -> Result<HttpRequest, Error> {
        (self.on_handshake)(request).await
    }

    pub async fn run_on_connect(&self, id: ID) {
        (self.on_connect)(id).await
    }

    pub async fn run_on_close(&self, id: ID, status: Option<u16>) {
        (self.on_close)((id, status)).await
    }

    pub async fn run_on_error(&self, id: ID, error: Arc<Error>) {
        (self.on_error)((id, error)).await
    }

    pub async fn run_on_message(&self, id: ID, message: Message) {
        (self.on_message)((id, message)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn chain_runs_in_registration_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let order_a = order.clone();
        let first: OnConnect = Arc::new(move |id, next| {
            let order_a = order_a.clone();
            Box::pin(async move {
                order_a.lock().unwrap().push("first");
                next(id).await
            })
        });

        let order_b = order.clone();
        let second: OnConnect = Arc::new(move |id, next| {
            let order_b = order_b.clone();
            Box::pin(async move {
                order_b.lock().unwrap().push("second");
                next(id).await
            })
        });

        let chain = InterceptorChainBuilder::new()
            .on_connect(first)
            .on_connect(second)
            .build();

        chain.run_on_connect(generate_test_id()).await;

        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn short_circuit_skips_remaining_interceptors() {
        let calls = Arc::new(AtomicUsize::new(0));

        let blocker: OnConnect = Arc::new(|_id, _next| Box::pin(async move {}));

        let calls_clone = calls.clone();
        let never_called: OnConnect = Arc::new(move |id, next| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            next(id)
        });

        let chain = InterceptorChainBuilder::new()
            .on_connect(blocker)
            .on_connect(never_called)
            .build();

        chain.run_on_connect(generate_test_id()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    fn generate_test_id() -> ID {
        crate::event::generate_new_uuid()
    }
}
