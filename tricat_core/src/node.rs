//! The content node: ingest, announce, locate, fetch and serve blocks.
//!
//! A node owns a transport endpoint, a latency-wrapped block store and a
//! routing table. One background task drains the transport; responses are
//! routed to the request that is waiting for them, requests are served on
//! their own tasks so a slow store never stalls the receive loop.

use crate::chunker::Chunker;
use crate::cid::ContentId;
use crate::codec::{Block, CodecError};
use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::message::{hello_ack_transcript, hello_transcript, Message, RequestId};
use crate::routing::RoutingTable;
use crate::store::{BlockStore, LatentStore, MemoryBlockStore, StoreStats};
use crate::sync::lock;
use bytes::Bytes;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use futures::future::join_all;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::AsyncRead;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tricat_env::{EnvError, LatencyProfile, NodeContext, PeerId, Transport};

type Pending = Mutex<HashMap<RequestId, oneshot::Sender<Message>>>;

/// A content-addressed storage and retrieval node.
///
/// Cloning is not offered; share a node behind an `Arc` if several tasks
/// need it. Dropping the node closes it.
pub struct Node<C: NodeContext, T: Transport<Message = Message>> {
    inner: Arc<Inner<C, T>>,
}

struct Inner<C, T> {
    id: PeerId,
    config: NodeConfig,
    profile: LatencyProfile,
    context: Arc<C>,
    transport: T,
    signing_key: SigningKey,
    store: LatentStore<C, MemoryBlockStore>,
    routing: Mutex<RoutingTable>,
    pending: Pending,
    next_request: AtomicU64,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl<C, T> Node<C, T>
where
    C: NodeContext,
    T: Transport<Message = Message>,
{
    /// Builds a node over `transport` and starts its receive loop.
    ///
    /// `signing_key` must be the key behind the transport's identity. The
    /// node's lifetime is bounded by `scope`: cancelling it aborts every
    /// in-flight operation with [`NodeError::Cancelled`].
    pub fn new(
        context: Arc<C>,
        transport: T,
        signing_key: SigningKey,
        profile: LatencyProfile,
        config: NodeConfig,
        scope: &CancellationToken,
    ) -> Result<Self, NodeError> {
        let id = transport.local_id();
        if PeerId::from_signing_key(&signing_key) != id {
            return Err(NodeError::IdentityMismatch(id));
        }
        if scope.is_cancelled() {
            return Err(NodeError::Cancelled);
        }

        let store = match config.store_capacity {
            Some(capacity) => MemoryBlockStore::with_capacity(capacity),
            None => MemoryBlockStore::new(),
        };
        let store = LatentStore::new(Arc::clone(&context), store, profile.storage_delay);

        let inner = Arc::new(Inner {
            id,
            profile,
            context: Arc::clone(&context),
            transport,
            signing_key,
            store,
            routing: Mutex::new(RoutingTable::new(id)),
            pending: Mutex::new(HashMap::new()),
            next_request: AtomicU64::new(1),
            cancel: scope.child_token(),
            closed: AtomicBool::new(false),
            config,
        });

        let receiver = Arc::clone(&inner);
        context.spawn("node-receive", async move { receiver.run().await });

        info!(
            "Node {} started as {} ({})",
            inner.config.name, id, inner.profile
        );
        Ok(Self { inner })
    }

    pub fn id(&self) -> PeerId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn profile(&self) -> LatencyProfile {
        self.inner.profile
    }

    /// Verified contacts, in a stable order.
    pub fn contacts(&self) -> Vec<PeerId> {
        lock(&self.inner.routing).contacts()
    }

    pub fn store_stats(&self) -> StoreStats {
        self.inner.store.stats()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Connects to each peer and adds it to the routing table.
    ///
    /// Our own id is skipped and peers that are already contacts are not
    /// contacted again. A peer is added only after its acknowledgement
    /// verifies against its identity.
    pub async fn bootstrap(&self, peers: &[PeerId]) -> Result<(), NodeError> {
        let inner = &self.inner;
        inner
            .guarded(async {
                for peer in peers {
                    inner.handshake(*peer).await?;
                }
                Ok::<_, NodeError>(())
            })
            .await
    }

    /// Ingests `reader` to EOF, announces every block and returns the root.
    pub async fn add<R>(&self, reader: R) -> Result<ContentId, NodeError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let inner = &self.inner;
        inner
            .guarded(async move {
                let started = inner.context.now();
                let chunker = Chunker::new(inner.config.chunk_size, inner.config.max_links);
                let ingested = chunker.ingest(reader, &inner.store).await?;
                inner.provide(&ingested.blocks).await?;
                info!(
                    "{} added {} ({} bytes, {} blocks) in {:?}",
                    inner.config.name,
                    ingested.root,
                    ingested.size,
                    ingested.blocks.len(),
                    inner.context.now().saturating_sub(started)
                );
                Ok::<_, NodeError>(ingested.root)
            })
            .await
    }

    /// Announces that this node holds `cids`.
    pub async fn provide(&self, cids: &[ContentId]) -> Result<(), NodeError> {
        self.inner.guarded(self.inner.provide(cids)).await
    }

    /// Locates peers other than this node that hold `cid`.
    pub async fn find_providers(&self, cid: ContentId) -> Result<Vec<PeerId>, NodeError> {
        self.inner.guarded(self.inner.find_providers(cid)).await
    }

    /// Resolves `root` and returns a stream over its content bytes.
    ///
    /// The tree's branches are fetched before this returns; leaves are
    /// fetched as the stream is polled, several at a time, and yielded in
    /// order. Every block is verified against its identifier and cached
    /// locally.
    pub async fn cat(&self, root: ContentId) -> Result<ContentStream, NodeError> {
        let inner = Arc::clone(&self.inner);
        let session = Arc::new(Session::default());
        let resolved = inner.guarded(inner.resolve(root, &session)).await?;

        let (size, chunks) = match resolved {
            Resolved::Inline(data) => {
                let size = data.len() as u64;
                (size, stream::once(async move { Ok::<_, NodeError>(data) }).boxed())
            }
            Resolved::Leaves { size, cids } => {
                let concurrency = inner.config.fetch_concurrency.max(1);
                let chunks = stream::iter(cids)
                    .map(move |cid| {
                        let inner = Arc::clone(&inner);
                        let session = Arc::clone(&session);
                        async move { inner.guarded(inner.fetch_leaf(cid, &session)).await }
                    })
                    .buffered(concurrency)
                    .boxed();
                (size, chunks)
            }
        };

        debug!("Resolved {} ({} bytes)", root, size);
        Ok(ContentStream { root, size, chunks })
    }

    /// Stops the node. Idempotent.
    ///
    /// In-flight operations fail with [`NodeError::Closed`] and the
    /// transport endpoint and store are closed.
    pub fn close(&self) {
        self.inner.shutdown();
    }
}

impl<C, T> Drop for Node<C, T>
where
    C: NodeContext,
    T: Transport<Message = Message>,
{
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

/// Outcome of resolving a root block.
enum Resolved {
    /// The root is itself a leaf.
    Inline(Bytes),
    Leaves { size: u64, cids: Vec<ContentId> },
}

/// Peers that have served blocks during one retrieval.
#[derive(Default)]
struct Session {
    peers: Mutex<Vec<PeerId>>,
}

impl Session {
    fn peers(&self) -> Vec<PeerId> {
        lock(&self.peers).clone()
    }

    fn add(&self, peer: PeerId) {
        let mut peers = lock(&self.peers);
        if !peers.contains(&peer) {
            peers.push(peer);
        }
    }
}

/// Removes a pending request when its waiter goes away.
struct PendingEntry<'a> {
    pending: &'a Pending,
    request: RequestId,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.request);
    }
}

impl<C, T> Inner<C, T>
where
    C: NodeContext,
    T: Transport<Message = Message>,
{
    /// Runs `operation` unless the node is closed or its scope fires first.
    async fn guarded<F, R>(&self, operation: F) -> Result<R, NodeError>
    where
        F: Future<Output = Result<R, NodeError>>,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(NodeError::Closed);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(self.stop_reason()),
            result = operation => result,
        }
    }

    fn stop_reason(&self) -> NodeError {
        if self.closed.load(Ordering::Acquire) {
            NodeError::Closed
        } else {
            NodeError::Cancelled
        }
    }

    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        self.transport.close();
        self.store.close();
        lock(&self.pending).clear();
        info!("Node {} closed", self.config.name);
    }

    async fn run(self: Arc<Self>) {
        debug!("{}: receive loop started", self.config.name);
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = self.transport.recv() => next,
            };
            let Some((from, message)) = next else {
                break;
            };
            self.dispatch(from, message);
        }
        debug!("{}: receive loop stopped", self.config.name);
    }

    fn dispatch(self: &Arc<Self>, from: PeerId, message: Message) {
        if let Some(request) = message.response_to() {
            let waiter = lock(&self.pending).remove(&request);
            match waiter {
                Some(waiter) => {
                    let _ = waiter.send(message);
                }
                None => debug!(
                    "{}: dropping late {} from {}",
                    self.config.name,
                    message.kind(),
                    from
                ),
            }
            return;
        }

        let inner = Arc::clone(self);
        self.context.spawn("node-serve", async move {
            let kind = message.kind();
            if let Err(err) = inner.guarded(inner.serve(from, message)).await {
                debug!("{}: serving {} to {} failed: {}", inner.config.name, kind, from, err);
            }
        });
    }

    /// Answers one inbound request.
    async fn serve(&self, from: PeerId, message: Message) -> Result<(), NodeError> {
        let response = match message {
            Message::Hello { request, signature } => {
                if !self.verify(from, &hello_transcript(&from, &self.id), &signature) {
                    warn!("{}: rejecting hello from {}", self.config.name, from);
                    return Ok(());
                }
                if lock(&self.routing).add_contact(from) {
                    debug!("{}: accepted contact {}", self.config.name, from);
                }
                Message::HelloAck {
                    request,
                    signature: self.signing_key.sign(&hello_ack_transcript(&self.id, &from)),
                }
            }
            Message::Provide { request, cids } => {
                lock(&self.routing).add_providers(&cids, from);
                debug!(
                    "{}: {} provides {} blocks",
                    self.config.name,
                    from,
                    cids.len()
                );
                Message::ProvideAck { request }
            }
            Message::FindProviders { request, cid } => {
                let providers = lock(&self.routing).providers(&cid);
                Message::Providers {
                    request,
                    cid,
                    providers,
                }
            }
            Message::WantBlock { request, cid } => match self.store.get(&cid).await? {
                Some(data) => Message::Block { request, cid, data },
                None => Message::DontHave { request, cid },
            },
            other => {
                debug!("{}: ignoring {} from {}", self.config.name, other.kind(), from);
                return Ok(());
            }
        };
        self.transport.send(from, response).await?;
        Ok(())
    }

    fn verify(&self, peer: PeerId, transcript: &[u8], signature: &Signature) -> bool {
        peer.verifying_key()
            .map(|key| key.verify(transcript, signature).is_ok())
            .unwrap_or(false)
    }

    /// Sends a request and waits for its response, bounded by the request
    /// timeout when one is configured.
    async fn request<F>(&self, peer: PeerId, build: F) -> Result<Message, NodeError>
    where
        F: FnOnce(RequestId) -> Message,
    {
        let request = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(request, tx);
        let _entry = PendingEntry {
            pending: &self.pending,
            request,
        };

        self.transport.send(peer, build(request)).await?;

        let Some(timeout) = self.config.request_timeout else {
            return rx.await.map_err(|_| self.stop_reason());
        };
        tokio::select! {
            response = rx => response.map_err(|_| self.stop_reason()),
            _ = self.context.sleep(timeout) => Err(NodeError::Timeout {
                peer,
                ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn handshake(&self, peer: PeerId) -> Result<(), NodeError> {
        if peer == self.id {
            debug!("{}: skipping self in bootstrap", self.config.name);
            return Ok(());
        }
        if lock(&self.routing).is_contact(&peer) {
            debug!("{}: {} is already a contact", self.config.name, peer);
            return Ok(());
        }
        if !self.transport.is_linked(peer)? {
            return Err(EnvError::no_link(self.id, peer).into());
        }

        let signature = self.signing_key.sign(&hello_transcript(&self.id, &peer));
        let response = self
            .request(peer, |request| Message::Hello { request, signature })
            .await?;

        match response {
            Message::HelloAck { signature, .. } => {
                if !self.verify(peer, &hello_ack_transcript(&peer, &self.id), &signature) {
                    return Err(NodeError::Handshake {
                        peer,
                        reason: "acknowledgement signature does not verify",
                    });
                }
            }
            other => {
                return Err(NodeError::UnexpectedResponse {
                    peer,
                    kind: other.kind(),
                })
            }
        }

        let contacts = {
            let mut routing = lock(&self.routing);
            routing.add_contact(peer);
            routing.contact_count()
        };
        info!(
            "{} connected to {} ({} contacts)",
            self.config.name, peer, contacts
        );
        Ok(())
    }

    async fn routing_delay(&self) {
        let delay = self.profile.routing_delay;
        if !delay.is_zero() {
            self.context.sleep(delay).await;
        }
    }

    async fn provide(&self, cids: &[ContentId]) -> Result<(), NodeError> {
        self.routing_delay().await;

        let contacts = {
            let mut routing = lock(&self.routing);
            routing.add_providers(cids, self.id);
            debug!(
                "{}: {} provider records held",
                self.config.name,
                routing.record_count()
            );
            routing.contacts()
        };

        let announcements = contacts.iter().map(|contact| {
            self.request(*contact, |request| Message::Provide {
                request,
                cids: cids.to_vec(),
            })
        });
        let mut stored = false;
        let mut last_error = None;
        for (contact, result) in contacts.iter().zip(join_all(announcements).await) {
            match result {
                Ok(Message::ProvideAck { .. }) => stored = true,
                Ok(other) => {
                    warn!(
                        "{}: unexpected {} to provide from {}",
                        self.config.name,
                        other.kind(),
                        contact
                    );
                    last_error = Some(NodeError::UnexpectedResponse {
                        peer: *contact,
                        kind: other.kind(),
                    });
                }
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => {
                    warn!(
                        "{}: announcing to {} failed: {}",
                        self.config.name, contact, err
                    );
                    last_error = Some(err);
                }
            }
        }

        // One stored copy is enough for lookups to succeed.
        match last_error {
            Some(err) if !stored => Err(err),
            _ => Ok(()),
        }
    }

    async fn find_providers(&self, cid: ContentId) -> Result<Vec<PeerId>, NodeError> {
        self.routing_delay().await;

        let (mut found, contacts) = {
            let routing = lock(&self.routing);
            (routing.remote_providers(&cid), routing.contacts())
        };

        if found.is_empty() {
            let queries = contacts.iter().map(|contact| self.query_providers(*contact, cid));
            for (contact, result) in contacts.iter().zip(join_all(queries).await) {
                match result {
                    Ok(providers) => found.extend(providers.into_iter().filter(|p| *p != self.id)),
                    Err(err) if err.is_cancelled() => return Err(err),
                    Err(err) => warn!(
                        "{}: provider lookup via {} failed: {}",
                        self.config.name, contact, err
                    ),
                }
            }
            found.sort();
            found.dedup();

            let mut routing = lock(&self.routing);
            for provider in &found {
                routing.add_providers(&[cid], *provider);
            }
        }

        if found.is_empty() {
            return Err(NodeError::NoProviders(cid));
        }
        debug!("{}: {} providers for {}", self.config.name, found.len(), cid);
        Ok(found)
    }

    async fn query_providers(&self, contact: PeerId, cid: ContentId) -> Result<Vec<PeerId>, NodeError> {
        match self
            .request(contact, |request| Message::FindProviders { request, cid })
            .await?
        {
            Message::Providers { providers, .. } => Ok(providers),
            other => Err(NodeError::UnexpectedResponse {
                peer: contact,
                kind: other.kind(),
            }),
        }
    }

    /// Asks `peer` for one block. `None` means the peer does not have it.
    async fn want_block(&self, peer: PeerId, cid: ContentId) -> Result<Option<Bytes>, NodeError> {
        match self
            .request(peer, |request| Message::WantBlock { request, cid })
            .await?
        {
            Message::Block { cid: got, data, .. } if got == cid => Ok(Some(data)),
            Message::DontHave { .. } => Ok(None),
            other => Err(NodeError::UnexpectedResponse {
                peer,
                kind: other.kind(),
            }),
        }
    }

    /// Returns the encoded block, from the local store or from a provider.
    async fn fetch(&self, cid: ContentId, session: &Session) -> Result<Bytes, NodeError> {
        if let Some(encoded) = self.store.get(&cid).await? {
            return Ok(encoded);
        }

        let mut last_err = None;
        let tried = session.peers();
        for peer in &tried {
            match self.want_block(*peer, cid).await {
                Ok(Some(encoded)) => return self.accept(cid, encoded).await,
                Ok(None) => {}
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => last_err = Some(err),
            }
        }

        let providers = match self.find_providers(cid).await {
            Ok(providers) => providers,
            Err(NodeError::NoProviders(_)) if last_err.is_some() => Vec::new(),
            Err(err) => return Err(err),
        };

        for peer in providers.into_iter().filter(|p| !tried.contains(p)) {
            match self.want_block(peer, cid).await {
                Ok(Some(encoded)) => {
                    session.add(peer);
                    return self.accept(cid, encoded).await;
                }
                Ok(None) => {}
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => {
                    warn!("{}: fetching {} from {} failed: {}", self.config.name, cid, peer, err);
                    last_err = Some(err);
                }
            }
        }

        Err(match last_err {
            Some(source) => NodeError::Unreachable {
                cid,
                source: Box::new(source),
            },
            None => NodeError::NoProviders(cid),
        })
    }

    /// Verifies a fetched block and caches it.
    async fn accept(&self, cid: ContentId, encoded: Bytes) -> Result<Bytes, NodeError> {
        let actual = ContentId::of(&encoded);
        if actual != cid {
            return Err(NodeError::BlockHashMismatch {
                expected: cid,
                actual,
            });
        }
        self.store.put(cid, encoded.clone()).await?;
        Ok(encoded)
    }

    async fn fetch_leaf(&self, cid: ContentId, session: &Session) -> Result<Bytes, NodeError> {
        let encoded = self.fetch(cid, session).await?;
        Ok(Block::decode(&encoded)?.into_leaf()?)
    }

    /// Fetches the root and every branch below it, down to the leaf links.
    async fn resolve(&self, root: ContentId, session: &Session) -> Result<Resolved, NodeError> {
        let encoded = self.fetch(root, session).await?;
        let (mut height, size, mut layer) = match Block::decode(&encoded)? {
            Block::Leaf(data) => return Ok(Resolved::Inline(data)),
            Block::Branch {
                height,
                total_size,
                links,
            } => (height, total_size, links),
        };

        while height > 1 {
            let mut next = Vec::new();
            for link in &layer {
                let encoded = self.fetch(link.cid, session).await?;
                match Block::decode(&encoded)? {
                    Block::Branch {
                        height: child, links, ..
                    } if child == height - 1 => next.extend(links),
                    _ => return Err(CodecError::WrongKind { expected: "branch" }.into()),
                }
            }
            layer = next;
            height -= 1;
        }

        Ok(Resolved::Leaves {
            size,
            cids: layer.into_iter().map(|link| link.cid).collect(),
        })
    }
}

/// Content bytes of a retrieved tree, in order.
///
/// Poll it as a [`Stream`] of chunks or collect it with
/// [`read_to_end`](ContentStream::read_to_end). An error ends the content.
pub struct ContentStream {
    root: ContentId,
    size: u64,
    chunks: BoxStream<'static, Result<Bytes, NodeError>>,
}

impl ContentStream {
    pub fn root(&self) -> ContentId {
        self.root
    }

    /// Content size recorded in the root block.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Drains the stream into one buffer.
    pub async fn read_to_end(mut self) -> Result<Vec<u8>, NodeError> {
        let mut out = Vec::with_capacity(self.size as usize);
        while let Some(chunk) = self.chunks.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }
}

impl Stream for ContentStream {
    type Item = Result<Bytes, NodeError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.chunks.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for ContentStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStream")
            .field("root", &self.root)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}
