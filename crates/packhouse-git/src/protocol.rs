//! Git smart HTTP protocol implementation.
//!
//! A [`Session`] is created per POST request. The body is pushed into it
//! chunk by chunk with [`Session::feed`]; each call parses as far as the
//! buffered bytes allow and returns. After [`Session::finish`] the
//! session writes its response to a [`PacketSink`] via
//! [`Session::respond`].
//!
//! See: https://git-scm.com/docs/http-protocol

use crate::closure::{parse_filter, ClosureResolver, ObjectFilter};
use crate::decoder::{DecodeStep, PackDecoder};
use crate::pack::{parse_pack_header, PACK_CHECKSUM_LEN, PACK_HEADER_LEN};
use crate::pktline::{banded_lines, pkt_line, Band, PktLine, FLUSH_PKT};
use crate::serializer::PackWriter;
use crate::{GitError, PacketSink, ProtocolConfig, Result};
use bytes::Bytes;
use packhouse_storage::{GitStorage, ObjectId, PushCommand};
use sha1::{Digest, Sha1};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Git capabilities we advertise.
pub const CAPABILITIES: &str =
    "side-band-64k delete-refs report-status filter allow-reachable-sha1-in-want";

/// The two smart HTTP services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// Fetch and clone.
    UploadPack,
    /// Push.
    ReceivePack,
}

impl Service {
    /// Returns the service name as used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UploadPack => "git-upload-pack",
            Self::ReceivePack => "git-receive-pack",
        }
    }

    /// Content type of the ref advertisement.
    pub fn advertisement_content_type(&self) -> String {
        format!("application/x-{}-advertisement", self.as_str())
    }

    /// Content type of the POST response.
    pub fn result_content_type(&self) -> String {
        format!("application/x-{}-result", self.as_str())
    }
}

impl FromStr for Service {
    type Err = GitError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "git-upload-pack" => Ok(Self::UploadPack),
            "git-receive-pack" => Ok(Self::ReceivePack),
            other => Err(GitError::UnsupportedService(other.to_string())),
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds the `info/refs` advertisement for `service`.
///
/// HEAD comes first when it resolves, carrying `symref=HEAD:<target>`
/// next to the capabilities; a repository without refs advertises the
/// zero id as `capabilities^{}`.
pub async fn advertise_refs(storage: &dyn GitStorage, service: Service) -> Result<Vec<u8>> {
    let refs = storage.get_refs().await?;
    let head = storage.get_head_ref().await?;

    let mut lines: Vec<(ObjectId, String)> = Vec::with_capacity(refs.len() + 1);
    let mut caps = CAPABILITIES.to_string();
    if let Some(target) = head.as_deref() {
        if let Some(head_ref) = refs.iter().find(|r| r.name == target) {
            lines.push((head_ref.id, "HEAD".to_string()));
            caps.push_str(&format!(" symref=HEAD:{}", target));
        }
    }
    lines.extend(refs.into_iter().map(|r| (r.id, r.name)));

    let mut out = pkt_line(&[format!("# service={}\n", service).as_bytes()]);
    out.extend_from_slice(FLUSH_PKT);

    if lines.is_empty() {
        out.extend_from_slice(&pkt_line(&[
            ObjectId::ZERO.to_hex().as_bytes(),
            b" capabilities^{}\0",
            caps.as_bytes(),
            b"\n",
        ]));
    } else {
        for (i, (id, name)) in lines.iter().enumerate() {
            let line = if i == 0 {
                pkt_line(&[
                    id.to_hex().as_bytes(),
                    b" ",
                    name.as_bytes(),
                    b"\0",
                    caps.as_bytes(),
                    b"\n",
                ])
            } else {
                pkt_line(&[id.to_hex().as_bytes(), b" ", name.as_bytes(), b"\n"])
            };
            out.extend_from_slice(&line);
        }
    }

    out.extend_from_slice(FLUSH_PKT);
    Ok(out)
}

/// Parse stage of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Nothing read yet.
    Initial,
    /// Reading command pkt-lines.
    PktLine,
    /// Waiting for the 12-byte pack header.
    PackHeader,
    /// Decoding pack entries.
    PackData,
    /// Waiting for the trailing pack checksum.
    PackChecksum,
    /// Request fully parsed.
    Final,
    /// A fatal error occurred.
    Error,
}

/// Commands collected from an upload-pack request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchRequest {
    /// Requested objects, deduplicated, in request order.
    pub wants: Vec<ObjectId>,
    /// Objects the client claims to have.
    pub haves: Vec<ObjectId>,
    /// Partial-clone filter.
    pub filter: ObjectFilter,
    /// `deepen <n>` history limit.
    pub depth: Option<usize>,
}

/// Request-scoped protocol state machine.
pub struct Session {
    service: Service,
    storage: Arc<dyn GitStorage>,
    config: ProtocolConfig,
    stage: Stage,
    buffer: Vec<u8>,
    start: usize,
    capabilities: HashSet<String>,
    push_commands: Vec<PushCommand>,
    fetch: FetchRequest,
    decoder: PackDecoder,
    pack_hasher: Sha1,
    objects_left: u32,
}

impl Session {
    /// Creates a session for one request against `storage`.
    pub fn new(service: Service, storage: Arc<dyn GitStorage>, config: ProtocolConfig) -> Self {
        let decoder = PackDecoder::new(config.store_batch_size);
        Self {
            service,
            storage,
            config,
            stage: Stage::Initial,
            buffer: Vec::new(),
            start: 0,
            capabilities: HashSet::new(),
            push_commands: Vec::new(),
            fetch: FetchRequest::default(),
            decoder,
            pack_hasher: Sha1::new(),
            objects_left: 0,
        }
    }

    /// The service this session speaks.
    pub fn service(&self) -> Service {
        self.service
    }

    /// Current parse stage.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Capabilities the client requested.
    pub fn capabilities(&self) -> &HashSet<String> {
        &self.capabilities
    }

    /// Ref updates parsed so far.
    pub fn push_commands(&self) -> &[PushCommand] {
        &self.push_commands
    }

    /// Fetch negotiation parsed so far.
    pub fn fetch_request(&self) -> &FetchRequest {
        &self.fetch
    }

    /// Ids of pack objects received so far.
    pub fn received_objects(&self) -> &[ObjectId] {
        self.decoder.received()
    }

    /// Appends a chunk of the request body and parses as far as possible.
    pub async fn feed(&mut self, chunk: &[u8]) -> Result<()> {
        if self.stage == Stage::Error {
            return Err(GitError::Protocol("session already failed".to_string()));
        }
        self.buffer.extend_from_slice(chunk);
        let result = self.process().await;
        self.fail_on_error(result)
    }

    /// Signals the end of the request body.
    pub async fn finish(&mut self) -> Result<()> {
        let result = self.finish_inner().await;
        self.fail_on_error(result)
    }

    fn fail_on_error(&mut self, result: Result<()>) -> Result<()> {
        if let Err(e) = &result {
            tracing::debug!(service = %self.service, stage = ?self.stage, error = %e, "session failed");
            self.stage = Stage::Error;
        }
        result
    }

    async fn finish_inner(&mut self) -> Result<()> {
        if self.stage == Stage::Error {
            return Err(GitError::Protocol("session already failed".to_string()));
        }
        self.process().await?;

        let remaining = self.remaining().len();
        match (self.stage, self.service) {
            (Stage::Final, _) => {}
            (Stage::Initial | Stage::PktLine, Service::UploadPack) if remaining == 0 => {
                self.stage = Stage::Final;
            }
            (Stage::PackHeader, Service::ReceivePack) if remaining == 0 => {
                tracing::debug!(commands = self.push_commands.len(), "push without pack");
                self.stage = Stage::Final;
            }
            (stage, _) => {
                return Err(GitError::UnexpectedEof(format!(
                    "request ended in stage {:?} with {} unread bytes",
                    stage, remaining
                )))
            }
        }

        self.decoder.flush(self.storage.as_ref()).await
    }

    fn remaining(&self) -> &[u8] {
        &self.buffer[self.start..]
    }

    fn advance(&mut self, n: usize) {
        self.start += n;
    }

    /// Drops consumed bytes once enough of them have piled up.
    fn compact(&mut self) {
        if self.start >= self.config.compact_threshold {
            self.buffer.drain(..self.start);
            self.start = 0;
        }
    }

    async fn process(&mut self) -> Result<()> {
        loop {
            let progressed = match self.stage {
                Stage::Initial => {
                    self.stage = Stage::PktLine;
                    true
                }
                Stage::PktLine => self.read_command()?,
                Stage::PackHeader => self.read_pack_header()?,
                Stage::PackData => self.read_pack_entry().await?,
                Stage::PackChecksum => self.read_pack_checksum().await?,
                Stage::Final => {
                    if !self.remaining().is_empty() {
                        return Err(GitError::Protocol(format!(
                            "unexpected {} bytes after end of request",
                            self.remaining().len()
                        )));
                    }
                    false
                }
                Stage::Error => {
                    return Err(GitError::Protocol("session already failed".to_string()))
                }
            };
            self.compact();
            if !progressed {
                return Ok(());
            }
        }
    }

    fn read_command(&mut self) -> Result<bool> {
        let Some((pkt, used)) = PktLine::decode(self.remaining())? else {
            return Ok(false);
        };
        self.advance(used);

        match pkt {
            PktLine::Flush => {
                if self.service == Service::ReceivePack {
                    tracing::debug!(commands = self.push_commands.len(), "push commands read");
                    self.stage = Stage::PackHeader;
                }
            }
            PktLine::Data(data) => {
                let line = String::from_utf8(data)
                    .map_err(|_| GitError::InvalidPktLine("command is not valid UTF-8".to_string()))?;
                let line = line.trim_end_matches('\n');
                match self.service {
                    Service::ReceivePack => self.parse_push_command(line)?,
                    Service::UploadPack => self.parse_fetch_command(line)?,
                }
            }
            PktLine::Delimiter | PktLine::ResponseEnd => {
                return Err(GitError::Protocol(
                    "protocol v2 packets are not supported".to_string(),
                ))
            }
        }
        Ok(true)
    }

    fn parse_push_command(&mut self, line: &str) -> Result<()> {
        let (command, caps) = match line.split_once('\0') {
            Some((command, caps)) => (command, Some(caps)),
            None => (line, None),
        };

        let mut tokens = command.split(' ');
        let (Some(src), Some(dest), Some(ref_name)) = (tokens.next(), tokens.next(), tokens.next())
        else {
            return Err(GitError::UnknownCommand(line.to_string()));
        };
        let src = ObjectId::from_hex(src)?;
        let dest = ObjectId::from_hex(dest)?;

        if self.push_commands.is_empty() {
            match caps {
                Some(caps) => self.add_capabilities(caps.split(' ')),
                None => self.add_capabilities(tokens),
            }
        }

        let command = PushCommand::from_ids(src, dest, ref_name)
            .ok_or_else(|| GitError::UnknownCommand(line.to_string()))?;
        tracing::debug!(kind = ?command.kind, ref_name = %command.ref_name, "push command");
        self.push_commands.push(command);
        Ok(())
    }

    fn parse_fetch_command(&mut self, line: &str) -> Result<()> {
        let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
        match command {
            "want" => {
                let mut tokens = arg.split(' ');
                let id = ObjectId::from_hex(tokens.next().unwrap_or_default())?;
                if self.fetch.wants.is_empty() {
                    self.add_capabilities(tokens);
                }
                if !self.fetch.wants.contains(&id) {
                    self.fetch.wants.push(id);
                }
            }
            "have" => {
                if self.fetch.wants.is_empty() {
                    return Err(GitError::Protocol(
                        "client sent \"have\" without any \"want\"".to_string(),
                    ));
                }
                self.fetch.haves.push(ObjectId::from_hex(arg.trim())?);
            }
            "filter" => {
                self.fetch.filter = parse_filter(arg)?;
            }
            "deepen" => {
                let depth: usize = arg
                    .trim()
                    .parse()
                    .map_err(|_| GitError::Protocol(format!("invalid depth: {}", arg)))?;
                if depth == 0 {
                    return Err(GitError::Protocol("deepen 0 is not allowed".to_string()));
                }
                self.fetch.depth = Some(depth);
            }
            "shallow" => {
                tracing::debug!(id = arg, "client is shallow at");
            }
            "done" => {
                tracing::debug!(
                    wants = self.fetch.wants.len(),
                    haves = self.fetch.haves.len(),
                    "fetch negotiation done"
                );
                self.stage = Stage::Final;
            }
            _ => return Err(GitError::UnknownCommand(line.to_string())),
        }
        Ok(())
    }

    fn add_capabilities<'s>(&mut self, caps: impl Iterator<Item = &'s str>) {
        self.capabilities
            .extend(caps.filter(|c| !c.is_empty()).map(str::to_string));
    }

    fn read_pack_header(&mut self) -> Result<bool> {
        let remaining = self.remaining();
        if remaining.len() < PACK_HEADER_LEN {
            return Ok(false);
        }
        let mut header = [0u8; PACK_HEADER_LEN];
        header.copy_from_slice(&remaining[..PACK_HEADER_LEN]);
        let count = parse_pack_header(&header)?;

        self.pack_hasher.update(header);
        self.advance(PACK_HEADER_LEN);
        self.objects_left = count;
        self.stage = if count == 0 {
            Stage::PackChecksum
        } else {
            Stage::PackData
        };
        tracing::debug!(objects = count, "pack header read");
        Ok(true)
    }

    async fn read_pack_entry(&mut self) -> Result<bool> {
        let step = self
            .decoder
            .decode(&self.buffer[self.start..], self.storage.as_ref())
            .await?;

        match step {
            DecodeStep::NeedMore => Ok(false),
            DecodeStep::Empty { consumed } => {
                if self.push_commands.is_empty() {
                    return Err(GitError::UnsupportedObjectType(0));
                }
                self.pack_hasher
                    .update(&self.buffer[self.start..self.start + consumed]);
                self.advance(consumed);
                tracing::debug!("empty pack entry, skipping to checksum");
                self.stage = Stage::PackChecksum;
                Ok(true)
            }
            DecodeStep::Object { consumed, .. } => {
                self.pack_hasher
                    .update(&self.buffer[self.start..self.start + consumed]);
                self.advance(consumed);
                self.objects_left -= 1;

                let received = self.decoder.received().len();
                if self.config.progress_interval > 0 && received % self.config.progress_interval == 0 {
                    tracing::debug!(received, left = self.objects_left, "receiving objects");
                }
                if self.objects_left == 0 {
                    self.stage = Stage::PackChecksum;
                }
                Ok(true)
            }
        }
    }

    async fn read_pack_checksum(&mut self) -> Result<bool> {
        let remaining = self.remaining();
        if remaining.len() < PACK_CHECKSUM_LEN {
            return Ok(false);
        }
        let expected = hex::encode(&remaining[..PACK_CHECKSUM_LEN]);
        let actual = hex::encode(self.pack_hasher.finalize_reset());
        if expected != actual {
            return Err(GitError::ChecksumMismatch { expected, actual });
        }
        self.advance(PACK_CHECKSUM_LEN);

        self.decoder.flush(self.storage.as_ref()).await?;
        self.stage = Stage::Final;
        tracing::debug!(objects = self.decoder.received().len(), "pack received");
        Ok(true)
    }

    /// Writes the response for a finished request.
    ///
    /// A client that goes away mid-response ends the call quietly. Any
    /// other failure is reported on the error band before it is returned.
    pub async fn respond<K: PacketSink + ?Sized>(&mut self, sink: &mut K) -> Result<()> {
        if self.stage != Stage::Final {
            return Err(GitError::Protocol(format!(
                "cannot respond in stage {:?}",
                self.stage
            )));
        }

        let result = match self.service {
            Service::ReceivePack => self.respond_receive_pack(sink).await,
            Service::UploadPack => self.respond_upload_pack(sink).await,
        };

        match result {
            Err(GitError::ClientDisconnected) => {
                tracing::debug!(service = %self.service, "client disconnected");
                Ok(())
            }
            Err(e) => {
                if !sink.is_closed() {
                    let message = format!("{}\n", e);
                    let _ = sink
                        .send(Bytes::from(banded_lines(Band::Error, &[message.as_bytes()])))
                        .await;
                }
                Err(e)
            }
            Ok(()) => Ok(()),
        }
    }

    async fn respond_receive_pack<K: PacketSink + ?Sized>(&mut self, sink: &mut K) -> Result<()> {
        let received = self.decoder.received().to_vec();
        self.storage
            .receive_pack(&self.push_commands, &received)
            .await?;

        let mut out = Vec::new();
        if self.capabilities.contains("report-status") {
            out.extend(banded_lines(Band::Data, &[&pkt_line(&[b"unpack ok\n"])]));
            let mut seen = HashSet::new();
            for command in &self.push_commands {
                if seen.insert(command.ref_name.as_str()) {
                    let line = pkt_line(&[b"ok ", command.ref_name.as_bytes(), b"\n"]);
                    out.extend(banded_lines(Band::Data, &[&line]));
                }
            }
            out.extend(banded_lines(Band::Data, &[FLUSH_PKT]));
        }

        let message = receive_pack_message(self.push_commands.len(), received.len());
        out.extend(banded_lines(Band::Progress, &[message.as_bytes()]));
        out.extend_from_slice(FLUSH_PKT);
        sink.send(Bytes::from(out)).await?;

        tracing::info!(
            refs = self.push_commands.len(),
            objects = received.len(),
            "push completed"
        );
        Ok(())
    }

    async fn respond_upload_pack<K: PacketSink + ?Sized>(&mut self, sink: &mut K) -> Result<()> {
        let storage = self.storage.as_ref();
        let request = &self.fetch;
        let closure = ClosureResolver::new(storage, &self.config)
            .resolve(
                &request.wants,
                &request.haves,
                &request.filter,
                request.depth,
            )
            .await?;

        let mut negotiation = Vec::new();
        if request.depth.is_some() {
            for id in &closure.shallow {
                negotiation.extend(pkt_line(&[b"shallow ", id.to_hex().as_bytes(), b"\n"]));
            }
            negotiation.extend_from_slice(FLUSH_PKT);
        } else if let Some(last) = closure.common.last() {
            negotiation.extend(pkt_line(&[b"ACK ", last.to_hex().as_bytes(), b"\n"]));
        } else {
            negotiation.extend(pkt_line(&[b"NAK\n"]));
        }
        sink.send(Bytes::from(negotiation)).await?;

        PackWriter::new(sink)
            .write_pack(storage, &closure.objects, &self.config)
            .await?;

        let message = upload_pack_message(closure.objects.len());
        let mut tail = banded_lines(Band::Progress, &[message.as_bytes()]);
        tail.extend_from_slice(FLUSH_PKT);
        sink.send(Bytes::from(tail)).await?;

        tracing::info!(
            wants = request.wants.len(),
            haves = request.haves.len(),
            objects = closure.objects.len(),
            "fetch completed"
        );
        Ok(())
    }
}

fn plural(count: usize, word: &str) -> String {
    if count == 1 {
        format!("{} {}", count, word)
    } else {
        format!("{} {}s", count, word)
    }
}

/// Progress text sent after a push.
pub fn receive_pack_message(refs: usize, objects: usize) -> String {
    format!(
        "Received {} and {}\n\n",
        plural(refs, "ref"),
        plural(objects, "object")
    )
}

/// Progress text sent after a fetch.
pub fn upload_pack_message(objects: usize) -> String {
    if objects > 0 {
        format!("ACK {} objects\n", objects)
    } else {
        "ACK ok\n".to_string()
    }
}
