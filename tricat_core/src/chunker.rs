//! Streaming ingest: byte stream in, balanced block tree out.

use crate::cid::ContentId;
use crate::codec::{Block, Link};
use crate::error::NodeError;
use crate::store::BlockStore;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Result of ingesting a stream.
#[derive(Debug, Clone)]
pub struct Ingested {
    /// Identifier of the tree's root block.
    pub root: ContentId,

    /// Content bytes consumed from the stream.
    pub size: u64,

    /// Every block written, leaves first, root last.
    pub blocks: Vec<ContentId>,
}

/// Splits a stream into fixed-size leaves and builds branch layers above them.
///
/// Only one chunk is held in memory at a time; each leaf is written to the
/// store as soon as it is read. A stream that fits in one chunk is rooted at
/// its leaf; an empty stream yields a single empty leaf.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    max_links: usize,
}

impl Chunker {
    /// Creates a chunker. `chunk_size` is at least 1 and `max_links` at least 2.
    pub fn new(chunk_size: usize, max_links: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            max_links: max_links.max(2),
        }
    }

    /// Consumes `reader` to EOF, writing every block into `store`.
    pub async fn ingest<R, S>(&self, mut reader: R, store: &S) -> Result<Ingested, NodeError>
    where
        R: AsyncRead + Unpin + Send,
        S: BlockStore + ?Sized,
    {
        let mut blocks = Vec::new();
        let mut layer = Vec::new();
        let mut size = 0u64;

        loop {
            let chunk = self.read_chunk(&mut reader).await?;
            let at_eof = chunk.len() < self.chunk_size;
            if chunk.is_empty() && !layer.is_empty() {
                break;
            }

            size += chunk.len() as u64;
            let link = put(store, &Block::Leaf(Bytes::from(chunk)), &mut blocks).await?;
            layer.push(link);

            if at_eof {
                break;
            }
        }

        let mut height = 0u8;
        while layer.len() > 1 {
            height += 1;
            let mut next = Vec::with_capacity(layer.len().div_ceil(self.max_links));
            for group in layer.chunks(self.max_links) {
                let block = Block::Branch {
                    height,
                    total_size: group.iter().map(|l| l.size).sum(),
                    links: group.to_vec(),
                };
                next.push(put(store, &block, &mut blocks).await?);
            }
            layer = next;
        }

        let root = layer[0].cid;
        debug!(%root, size, blocks = blocks.len(), height, "ingested stream");

        Ok(Ingested { root, size, blocks })
    }

    /// Reads up to `chunk_size` bytes, short only at EOF.
    async fn read_chunk<R>(&self, reader: &mut R) -> Result<Vec<u8>, NodeError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut chunk = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < self.chunk_size {
            let n = reader.read(&mut chunk[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        chunk.truncate(filled);
        Ok(chunk)
    }
}

async fn put<S>(store: &S, block: &Block, written: &mut Vec<ContentId>) -> Result<Link, NodeError>
where
    S: BlockStore + ?Sized,
{
    let (cid, encoded) = block.seal();
    store.put(cid, encoded).await?;
    written.push(cid);
    Ok(Link {
        cid,
        size: block.content_size(),
    })
}
