// SPDX-License-Identifier: AGPL-3.0-only

//! VOTF link manager
//!
//! A VOTF link joins a producer's token write service (TWS) to a
//! consumer's token read service (TRS). Both ends are configured
//! independently; the consumer side is always written first so it is
//! ready to accept tokens before the producer can emit any.
//!
//! ```text
//! Unlinked --create--> Configured --set_size--> Active
//!                           ^                     |
//!                           +---- set_size ---- Flushed <--force_flush--+
//! Configured/Active/Flushed --destroy--> Unlinked
//! ```
//!
//! Width and height are not known at creation; they are written by the
//! first `set_size` and rewritten only when they change.

use crate::backend::{poll_until, IspBackend};
use crate::error::{PabloError, Result};
use crate::params::Size;
use pablo_chip::block::BlockId;
use pablo_chip::votf::{self as hw, consumer_token_lines, peer_code, producer_token_lines};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// One end of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VotfEndpoint {
    /// Block owning the token service
    pub block: BlockId,
    /// Token-service channel
    pub channel: u8,
}

impl VotfEndpoint {
    /// Endpoint on `block` channel `channel`
    pub const fn new(block: BlockId, channel: u8) -> Self {
        Self { block, channel }
    }
}

impl std::fmt::Display for VotfEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.ch{}", self.block, self.channel)
    }
}

/// Token-flow mode of a block's VOTF services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VotfMode {
    /// Tokens flow continuously
    #[default]
    Streaming,
    /// Token flow restarts at every frame start
    FrameStartStreaming,
}

impl VotfMode {
    const fn hw_code(self) -> u32 {
        match self {
            Self::Streaming => hw::mode::STREAMING,
            Self::FrameStartStreaming => hw::mode::FRAME_START_STREAMING,
        }
    }
}

/// Link state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Not configured
    Unlinked,
    /// Service configuration written to both ends
    Configured,
    /// Size written; tokens flow
    Active,
    /// Drained; needs a fresh size before tokens flow again
    Flushed,
}

/// Handle of a link inside its manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkId(u32);

/// One producer-to-consumer link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VotfLink {
    /// Writing end (TWS)
    pub producer: VotfEndpoint,
    /// Reading end (TRS)
    pub consumer: VotfEndpoint,
    /// Lines per token
    pub token_size: u32,
    /// Token-flow mode
    pub mode: VotfMode,
    /// Size last written, if any
    pub size: Option<Size>,
    /// Current state
    pub state: LinkState,
}

/// Owner of every VOTF link of a pipeline
#[derive(Debug)]
pub struct VotfLinkManager {
    backend: Arc<dyn IspBackend>,
    links: BTreeMap<LinkId, VotfLink>,
    next_id: u32,
    degraded: bool,
    flush_timeout: Duration,
}

impl VotfLinkManager {
    /// Manager programming through `backend`
    pub fn new(backend: Arc<dyn IspBackend>) -> Self {
        Self {
            backend,
            links: BTreeMap::new(),
            next_id: 0,
            degraded: false,
            flush_timeout: Duration::from_millis(10),
        }
    }

    /// Bound on each flush-completion wait
    #[must_use]
    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    /// Whether a configuration failure marked the pipeline degraded
    pub const fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Clear the degraded mark after the group manager recovered
    pub fn clear_degraded(&mut self) {
        self.degraded = false;
    }

    /// Link by handle
    pub fn link(&self, id: LinkId) -> Option<&VotfLink> {
        self.links.get(&id)
    }

    /// Live links
    pub fn links(&self) -> impl Iterator<Item = (LinkId, &VotfLink)> {
        self.links.iter().map(|(id, l)| (*id, l))
    }

    fn reject(&mut self, reason: String) -> PabloError {
        error!("VOTF: {reason}; pipeline degraded");
        self.degraded = true;
        PabloError::link_config(reason)
    }

    fn check(&self, producer: VotfEndpoint, consumer: VotfEndpoint, mode: VotfMode) -> std::result::Result<u32, String> {
        for ep in [producer, consumer] {
            if ep.channel >= hw::MAX_CHANNELS {
                return Err(format!("{ep}: channel beyond {}", hw::MAX_CHANNELS));
            }
        }
        if producer.block == consumer.block {
            return Err(format!("{producer} cannot feed its own block"));
        }
        let token = producer_token_lines(producer.block);
        let accepted = consumer_token_lines(consumer.block);
        if !accepted.contains(&token) {
            return Err(format!(
                "{consumer} accepts {accepted:?}-line tokens, {producer} emits {token}"
            ));
        }
        for link in self.links.values() {
            if link.producer == producer || link.consumer == consumer {
                return Err(format!("{producer} -> {consumer}: endpoint already linked"));
            }
            let shares_ip = [link.producer.block, link.consumer.block]
                .iter()
                .any(|b| *b == producer.block || *b == consumer.block);
            if shares_ip && link.mode != mode {
                return Err(format!(
                    "{producer} -> {consumer}: {mode:?} conflicts with {:?} on a shared IP",
                    link.mode
                ));
            }
        }
        Ok(token)
    }

    /// Configure a link, consumer side first
    ///
    /// # Errors
    ///
    /// Returns [`PabloError::LinkConfig`] and marks the manager degraded on
    /// a token-size or mode conflict; register write errors also degrade.
    pub fn create_link(&mut self, producer: VotfEndpoint, consumer: VotfEndpoint, mode: VotfMode) -> Result<LinkId> {
        let token = match self.check(producer, consumer, mode) {
            Ok(token) => token,
            Err(reason) => return Err(self.reject(reason)),
        };

        let b = &*self.backend;
        let configured = (|| -> Result<()> {
            let trs = |f| hw::trs_reg(consumer.channel, f);
            b.write32(consumer.block, trs(hw::LIMIT), hw::LIMIT_MAX)?;
            b.write32(consumer.block, trs(hw::PEER_IP), peer_code(producer.block))?;
            b.write32(consumer.block, trs(hw::PEER_CH), u32::from(producer.channel))?;
            b.write32(consumer.block, trs(hw::TOKEN_SIZE), token)?;
            b.write32(consumer.block, trs(hw::MODE), mode.hw_code())?;
            b.write32(consumer.block, trs(hw::ENABLE), 1)?;

            let tws = |f| hw::tws_reg(producer.channel, f);
            b.write32(producer.block, tws(hw::LIMIT), hw::LIMIT_MAX)?;
            b.write32(producer.block, tws(hw::PEER_IP), peer_code(consumer.block))?;
            b.write32(producer.block, tws(hw::PEER_CH), u32::from(consumer.channel))?;
            b.write32(producer.block, tws(hw::TOKEN_SIZE), token)?;
            b.write32(producer.block, tws(hw::MODE), mode.hw_code())?;
            b.write32(producer.block, tws(hw::ENABLE), 1)
        })();
        if let Err(e) = configured {
            self.degraded = true;
            error!("VOTF {producer} -> {consumer}: service configuration failed: {e}");
            for (block, reg) in [
                (consumer.block, hw::trs_reg(consumer.channel, hw::ENABLE)),
                (producer.block, hw::tws_reg(producer.channel, hw::ENABLE)),
            ] {
                if let Err(off) = b.write32(block, reg, 0) {
                    warn!("VOTF {producer} -> {consumer}: {block} left enabled: {off}");
                }
            }
            return Err(e);
        }

        let id = LinkId(self.next_id);
        self.next_id += 1;
        self.links.insert(
            id,
            VotfLink {
                producer,
                consumer,
                token_size: token,
                mode,
                size: None,
                state: LinkState::Configured,
            },
        );
        info!("VOTF link {producer} -> {consumer} ({token}-line tokens, {mode:?})");
        Ok(id)
    }

    fn get(&self, id: LinkId) -> Result<&VotfLink> {
        self.links
            .get(&id)
            .ok_or_else(|| PabloError::invalid_state(format!("VOTF link {id:?} not configured")))
    }

    /// Write the frame size to both ends; unchanged sizes cost nothing
    ///
    /// # Errors
    ///
    /// Returns [`PabloError::InvalidGeometry`] for a zero dimension and
    /// [`PabloError::InvalidState`] for an unknown link. A failed register
    /// write marks the manager degraded.
    pub fn set_size(&mut self, id: LinkId, width: u32, height: u32) -> Result<()> {
        let link = self.get(id)?;
        if width == 0 || height == 0 {
            return Err(PabloError::invalid_geometry(format!(
                "VOTF {} -> {}: size {width}x{height}",
                link.producer, link.consumer
            )));
        }
        let size = Size::new(width, height);
        if link.state == LinkState::Active && link.size == Some(size) {
            return Ok(());
        }
        let (p, c) = (link.producer, link.consumer);
        let b = &*self.backend;
        let written = b
            .write32(p.block, hw::tws_reg(p.channel, hw::WIDTH), width)
            .and_then(|()| b.write32(p.block, hw::tws_reg(p.channel, hw::HEIGHT), height))
            .and_then(|()| b.write32(c.block, hw::trs_reg(c.channel, hw::WIDTH), width))
            .and_then(|()| b.write32(c.block, hw::trs_reg(c.channel, hw::HEIGHT), height));
        if let Err(e) = written {
            self.degraded = true;
            error!("VOTF {p} -> {c}: size {size} not written: {e}");
            return Err(e);
        }

        if let Some(link) = self.links.get_mut(&id) {
            link.size = Some(size);
            link.state = LinkState::Active;
        }
        debug!("VOTF {p} -> {c}: size {size}");
        Ok(())
    }

    /// Drain in-flight tokens on both ends
    ///
    /// # Errors
    ///
    /// Returns [`PabloError::Timeout`] if a service does not report the flush done.
    pub fn force_flush(&mut self, id: LinkId) -> Result<()> {
        let link = self.get(id)?;
        let (p, c) = (link.producer, link.consumer);
        let b = &*self.backend;
        b.write32(p.block, hw::tws_reg(p.channel, hw::FLUSH), 1)?;
        poll_until(self.flush_timeout, &format!("VOTF {p} flush"), || {
            Ok(b.read32(p.block, hw::tws_reg(p.channel, hw::FLUSH_STATUS))? == 0)
        })?;
        b.write32(c.block, hw::trs_reg(c.channel, hw::FLUSH), 1)?;
        poll_until(self.flush_timeout, &format!("VOTF {c} flush"), || {
            Ok(b.read32(c.block, hw::trs_reg(c.channel, hw::FLUSH_STATUS))? == 0)
        })?;

        if let Some(link) = self.links.get_mut(&id) {
            link.state = LinkState::Flushed;
            link.size = None;
        }
        info!("VOTF {p} -> {c} flushed");
        Ok(())
    }

    /// Disable both ends and forget the link
    ///
    /// Only valid with no frame in flight; the caller serializes this
    /// against shots.
    ///
    /// # Errors
    ///
    /// Returns error if a disable write fails; the link is kept in that case.
    pub fn destroy_link(&mut self, id: LinkId) -> Result<()> {
        let link = self.get(id)?;
        let (p, c) = (link.producer, link.consumer);
        self.backend.write32(p.block, hw::tws_reg(p.channel, hw::ENABLE), 0)?;
        self.backend.write32(c.block, hw::trs_reg(c.channel, hw::ENABLE), 0)?;
        self.links.remove(&id);
        info!("VOTF link {p} -> {c} destroyed");
        Ok(())
    }

    /// Destroy every link, continuing past failures
    ///
    /// # Errors
    ///
    /// Returns the first failure after attempting all links.
    pub fn destroy_all(&mut self) -> Result<()> {
        let ids = self.links.keys().copied().collect::<Vec<_>>();
        let mut first = None;
        for id in ids {
            if let Err(e) = self.destroy_link(id) {
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SoftwareBackend;

    fn manager() -> (Arc<SoftwareBackend>, VotfLinkManager) {
        let sim = Arc::new(SoftwareBackend::new("sim0"));
        let mgr = VotfLinkManager::new(sim.clone());
        (sim, mgr)
    }

    const RGBP_OUT: VotfEndpoint = VotfEndpoint::new(BlockId::Rgbp, 0);
    const MCSC_IN: VotfEndpoint = VotfEndpoint::new(BlockId::Mcsc, 0);

    #[test]
    fn consumer_configured_with_producer_identity() {
        let (sim, mut mgr) = manager();
        mgr.create_link(RGBP_OUT, MCSC_IN, VotfMode::Streaming).unwrap();
        assert_eq!(sim.register(BlockId::Mcsc, hw::trs_reg(0, hw::PEER_IP)), peer_code(BlockId::Rgbp));
        assert_eq!(sim.register(BlockId::Mcsc, hw::trs_reg(0, hw::LIMIT)), hw::LIMIT_MAX);
        assert_eq!(sim.register(BlockId::Rgbp, hw::tws_reg(0, hw::ENABLE)), 1);
        assert_eq!(sim.register(BlockId::Mcsc, hw::trs_reg(0, hw::WIDTH)), 0);
    }

    #[test]
    fn unchanged_size_is_free() {
        let (sim, mut mgr) = manager();
        let id = mgr.create_link(RGBP_OUT, MCSC_IN, VotfMode::Streaming).unwrap();
        mgr.set_size(id, 1920, 1080).unwrap();
        let writes = sim.write_count();
        mgr.set_size(id, 1920, 1080).unwrap();
        assert_eq!(sim.write_count(), writes);
        mgr.set_size(id, 1280, 720).unwrap();
        assert_eq!(sim.write_count(), writes + 4);
    }

    #[test]
    fn zero_size_rejected() {
        let (_sim, mut mgr) = manager();
        let id = mgr.create_link(RGBP_OUT, MCSC_IN, VotfMode::Streaming).unwrap();
        assert!(mgr.set_size(id, 0, 1080).is_err());
        assert!(mgr.set_size(id, 1920, 0).is_err());
        assert_eq!(mgr.link(id).unwrap().state, LinkState::Configured);
        assert!(!mgr.is_degraded());
    }

    #[test]
    fn flush_requires_fresh_size() {
        let (sim, mut mgr) = manager();
        let id = mgr.create_link(RGBP_OUT, MCSC_IN, VotfMode::Streaming).unwrap();
        mgr.set_size(id, 1920, 1080).unwrap();
        mgr.force_flush(id).unwrap();
        assert_eq!(mgr.link(id).unwrap().state, LinkState::Flushed);
        let writes = sim.write_count();
        mgr.set_size(id, 1920, 1080).unwrap();
        assert_eq!(sim.write_count(), writes + 4);
        assert_eq!(mgr.link(id).unwrap().state, LinkState::Active);
    }

    #[test]
    fn partial_link_is_disabled() {
        let (sim, mut mgr) = manager();
        sim.fail_writes(BlockId::Rgbp, true);
        assert!(mgr.create_link(RGBP_OUT, MCSC_IN, VotfMode::Streaming).is_err());
        assert!(mgr.is_degraded());
        assert_eq!(sim.register(BlockId::Mcsc, hw::trs_reg(0, hw::PEER_IP)), peer_code(BlockId::Rgbp));
        assert_eq!(sim.register(BlockId::Mcsc, hw::trs_reg(0, hw::ENABLE)), 0);
        assert_eq!(mgr.links().count(), 0);
    }

    #[test]
    fn failed_resize_degrades() {
        let (sim, mut mgr) = manager();
        let id = mgr.create_link(RGBP_OUT, MCSC_IN, VotfMode::Streaming).unwrap();
        sim.fail_writes(BlockId::Mcsc, true);
        assert!(mgr.set_size(id, 1920, 1080).is_err());
        assert!(mgr.is_degraded());
        assert_eq!(mgr.link(id).unwrap().state, LinkState::Configured);
    }

    #[test]
    fn token_mismatch_degrades() {
        let (_sim, mut mgr) = manager();
        let err = mgr
            .create_link(VotfEndpoint::new(BlockId::Taa0, 0), MCSC_IN, VotfMode::Streaming)
            .unwrap_err();
        assert!(matches!(err, PabloError::LinkConfig { .. }));
        assert!(mgr.is_degraded());
    }

    #[test]
    fn mode_conflict_on_shared_ip() {
        let (_sim, mut mgr) = manager();
        mgr.create_link(VotfEndpoint::new(BlockId::Taa0, 0), VotfEndpoint::new(BlockId::Byrp, 0), VotfMode::FrameStartStreaming)
            .unwrap();
        let err = mgr
            .create_link(VotfEndpoint::new(BlockId::Byrp, 1), VotfEndpoint::new(BlockId::Rgbp, 0), VotfMode::Streaming)
            .unwrap_err();
        assert!(matches!(err, PabloError::LinkConfig { .. }));
    }

    #[test]
    fn destroy_disables_both_ends() {
        let (sim, mut mgr) = manager();
        let id = mgr.create_link(RGBP_OUT, MCSC_IN, VotfMode::Streaming).unwrap();
        mgr.destroy_link(id).unwrap();
        assert_eq!(sim.register(BlockId::Rgbp, hw::tws_reg(0, hw::ENABLE)), 0);
        assert_eq!(sim.register(BlockId::Mcsc, hw::trs_reg(0, hw::ENABLE)), 0);
        assert!(mgr.set_size(id, 1920, 1080).is_err());
        // Endpoint free again
        mgr.create_link(RGBP_OUT, MCSC_IN, VotfMode::Streaming).unwrap();
    }
}
