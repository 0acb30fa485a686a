//! The bootstrap driver: phase sequencing from local probe to commit.

use crate::{
    apply_observer_override, derive_nodes_config, nodes_config_key, resolve_self_shard,
    BootstrapComponents, BootstrapError, BootstrapResult, CandidateTallies,
    EpochStartInterceptorContainer, EpochStartMetaLocator, HeaderIntegrityVerifier,
    HeadersByHashSyncer, InterceptorContainerArgs, Messenger, NodeShuffler, Parameters,
    PendingMiniBlocksSyncer, PoolsHolder, RequestCoordinator, Rounder, SingleSigner,
    StatusHandler, StorageWriter, Topic, TrieSyncer, TrieSyncerArgs, WhitelistHandler,
    EPOCH_START_REQUEST_TOPIC, METRIC_NONCE_AT_EPOCH_START, METRIC_ROUND_AT_EPOCH_START,
};
use kn_config::{BootstrapConfig, GenesisSetup};
use kn_storage::{
    epoch_start_key, LatestStorageData, LatestStorageDataProvider, StorageUnit, StorageUnitOpener,
    TrieStorageManager,
};
use kn_types::{
    decode, BlockHeader, Epoch, EpochStartMetaBlock, Hash, NodesCoordinatorRegistry, Noticer,
    Notifier, ShardId, ValidatorPubKey, METACHAIN_SHARD_ID,
};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{debug, info, warn};

/// Collaborators and configuration the driver is built from.
///
/// Every collaborator is mandatory; ownership transfers here, so there is no
/// runtime probing for absent pieces.
pub struct EpochStartBootstrapArgs {
    /// Engine tuning.
    pub config: BootstrapConfig,
    /// The network as configured at genesis.
    pub genesis: GenesisSetup,
    /// This node's validator public key.
    pub own_pub_key: ValidatorPubKey,
    /// Transport for topics, gossip and processors.
    pub messenger: Arc<dyn Messenger>,
    /// Header authentication.
    pub header_integrity_verifier: Arc<dyn HeaderIntegrityVerifier>,
    /// Transaction signature verification.
    pub single_signer: Arc<dyn SingleSigner>,
    /// Monotonic round counter.
    pub rounder: Arc<dyn Rounder>,
    /// Deterministic validator shuffling.
    pub node_shuffler: Arc<dyn NodeShuffler>,
    /// Metrics sink.
    pub status_handler: Arc<dyn StatusHandler>,
    /// Durable storage units for the commit path.
    pub storage_opener: Arc<dyn StorageUnitOpener>,
    /// Probe for the latest durable checkpoint.
    pub latest_storage_data: Arc<dyn LatestStorageDataProvider>,
    /// Storage for the user-accounts trie.
    pub user_trie_storage: Arc<dyn TrieStorageManager>,
    /// Storage for the peer-accounts trie.
    pub peer_trie_storage: Arc<dyn TrieStorageManager>,
}

/// Handles requesting the data a node needs when joining the network late.
pub struct EpochStartBootstrap {
    config: BootstrapConfig,
    genesis: GenesisSetup,
    own_pub_key: ValidatorPubKey,
    messenger: Arc<dyn Messenger>,
    integrity: Arc<dyn HeaderIntegrityVerifier>,
    signer: Arc<dyn SingleSigner>,
    rounder: Arc<dyn Rounder>,
    shuffler: Arc<dyn NodeShuffler>,
    status: Arc<dyn StatusHandler>,
    opener: Arc<dyn StorageUnitOpener>,
    latest_provider: Arc<dyn LatestStorageDataProvider>,
    user_trie_storage: Arc<dyn TrieStorageManager>,
    peer_trie_storage: Arc<dyn TrieStorageManager>,

    pools: Arc<PoolsHolder>,
    whitelist: Arc<WhitelistHandler>,
    shutdown: Arc<Notifier>,

    base_data: LatestStorageData,
    start_epoch: Epoch,
    start_round: i64,
    hardfork_seeded: bool,
}

/// Per-run network plumbing shared by the sync phases.
struct NetworkContext {
    coordinator: Arc<RequestCoordinator>,
    headers_syncer: HeadersByHashSyncer,
    shutdown: Noticer,
}

impl EpochStartBootstrap {
    /// Validate the arguments and build a driver.
    pub fn new(args: EpochStartBootstrapArgs) -> BootstrapResult<Self> {
        if args.config.rounds_per_epoch == 0 {
            return Err(BootstrapError::InvalidConfiguration(
                "rounds_per_epoch must be positive".to_string(),
            ));
        }
        if args.config.min_num_connected_peers_to_start == 0 {
            return Err(BootstrapError::InvalidConfiguration(
                "min_num_connected_peers_to_start must be positive".to_string(),
            ));
        }
        if args.genesis.num_shards == 0 {
            return Err(BootstrapError::InvalidConfiguration(
                "genesis must configure at least one shard".to_string(),
            ));
        }

        let whitelist = Arc::new(WhitelistHandler::new(&args.config.whitelist));

        let mut driver = Self {
            genesis: args.genesis,
            own_pub_key: args.own_pub_key,
            messenger: args.messenger,
            integrity: args.header_integrity_verifier,
            signer: args.single_signer,
            rounder: args.rounder,
            shuffler: args.node_shuffler,
            status: args.status_handler,
            opener: args.storage_opener,
            latest_provider: args.latest_storage_data,
            user_trie_storage: args.user_trie_storage,
            peer_trie_storage: args.peer_trie_storage,
            pools: PoolsHolder::new(),
            whitelist,
            shutdown: Arc::new(Notifier::new()),
            base_data: LatestStorageData::default(),
            start_epoch: 0,
            start_round: 0,
            hardfork_seeded: false,
            config: args.config,
        };

        if driver.config.hardfork.after_hardfork {
            let hardfork = &driver.config.hardfork;
            driver.start_epoch = hardfork.start_epoch;
            driver.start_round = hardfork.start_round as i64;
            driver.base_data.last_epoch = hardfork.start_epoch;
            driver.base_data.last_round = hardfork.start_round as i64;
            driver.base_data.epoch_start_round = hardfork.start_round;
            driver.hardfork_seeded = true;
        }

        Ok(driver)
    }

    /// Handle for cancelling a running bootstrap from another task.
    pub fn cancel_handle(&self) -> Arc<Notifier> {
        Arc::clone(&self.shutdown)
    }

    /// Base data as seeded at construction, exposed for inspection.
    pub fn base_data(&self) -> &LatestStorageData {
        &self.base_data
    }

    /// Run the fast bootstrap from local storage or the network.
    pub async fn bootstrap(&mut self) -> BootstrapResult<Parameters> {
        if !self.config.start_in_epoch_enabled {
            warn!(target: "bootstrap::driver", "fast bootstrap is disabled");
            return self.prepare_local_only();
        }

        let result = self.bootstrap_inner().await;
        self.cleanup();
        result
    }

    async fn bootstrap_inner(&mut self) -> BootstrapResult<Parameters> {
        self.init_base_data()?;

        let epoch_zero = self.is_start_in_epoch_zero();
        let epoch_saved = self.is_current_epoch_saved();

        if epoch_zero || epoch_saved {
            if self.base_data.last_epoch <= self.start_epoch {
                return self.prepare_epoch_zero();
            }

            match self.prepare_from_storage() {
                Ok(parameters) => return Ok(parameters),
                Err(err) if self.base_data.shuffled_out => return Err(err),
                Err(err) => {
                    warn!(
                        target: "bootstrap::driver",
                        %err, "could not start from storage, trying network sync"
                    );
                }
            }
        }

        self.sync_from_network().await
    }

    /// Release everything bound to the transport; runs on every exit path.
    fn cleanup(&self) {
        debug!(target: "bootstrap::driver", "unregistering message processors and un-joining topics");
        self.pools.trie_nodes.clear();
        if let Err(err) = self.messenger.unregister_all() {
            warn!(target: "bootstrap::driver", %err, "failed to unregister message processors");
        }
        if let Err(err) = self.messenger.unjoin_all() {
            warn!(target: "bootstrap::driver", %err, "failed to un-join topics");
        }
    }

    fn init_base_data(&mut self) -> BootstrapResult<()> {
        // a hardfork checkpoint replaces the storage probe entirely
        if self.hardfork_seeded {
            return Ok(());
        }
        self.base_data = self.latest_provider.probe()?;
        Ok(())
    }

    fn is_start_in_epoch_zero(&self) -> bool {
        let now =
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        if now < self.genesis.start_time {
            return true;
        }

        let current_round = self.rounder.index() - self.start_round;
        let epoch_end_plus_grace =
            self.config.rounds_per_epoch as f64 * (1.0 + self.config.grace_fraction);
        debug!(
            target: "bootstrap::driver",
            current_round, epoch_end_plus_grace, "start-in-epoch-zero check"
        );
        (current_round as f64) < epoch_end_plus_grace
    }

    fn is_current_epoch_saved(&self) -> bool {
        if !self.base_data.storage_exists {
            return false;
        }

        let computed_round = self.rounder.index();
        if computed_round - self.base_data.last_round < self.config.round_grace_period as i64 {
            return true;
        }

        let rounds_since_epoch_start =
            computed_round - self.base_data.epoch_start_round as i64;
        let epoch_end_plus_grace =
            self.config.rounds_per_epoch as f64 * (1.0 + self.config.grace_fraction);
        (rounds_since_epoch_start as f64) < epoch_end_plus_grace
    }

    fn prepare_epoch_zero(&self) -> BootstrapResult<Parameters> {
        let mut shard_id = self.genesis.self_shard_id;
        if !self.genesis.contains_key(&self.own_pub_key) {
            shard_id = apply_observer_override(
                shard_id,
                self.config.destination_shard_as_observer,
                false,
            );
        }
        info!(target: "bootstrap::driver", epoch = self.start_epoch, shard_id, "starting in epoch zero");
        Ok(Parameters {
            epoch: self.start_epoch,
            self_shard_id: shard_id,
            num_shards: self.genesis.num_shards,
            nodes_config: None,
        })
    }

    /// The start-in-epoch-disabled path: local state only, no topics joined.
    fn prepare_local_only(&mut self) -> BootstrapResult<Parameters> {
        self.init_base_data()?;
        if !self.base_data.storage_exists {
            return Ok(Parameters {
                epoch: self.start_epoch,
                self_shard_id: self.genesis.self_shard_id,
                num_shards: self.genesis.num_shards,
                nodes_config: None,
            });
        }

        let (registry, _) = self.load_stored_checkpoint()?;
        let resolution = resolve_self_shard(
            &registry,
            &self.own_pub_key,
            self.config.destination_shard_as_observer,
            self.base_data.num_shards,
            self.genesis.self_shard_id,
        );
        let shard_id = apply_observer_override(
            resolution.shard_id,
            self.config.destination_shard_as_observer,
            resolution.is_validator,
        );
        let epoch = self.epoch_to_start();
        Ok(Parameters {
            epoch,
            self_shard_id: shard_id,
            num_shards: self.base_data.num_shards,
            nodes_config: Some(registry),
        })
    }

    /// A node shuffled out of its shard restarts from the configured start
    /// epoch rather than the last one it saw.
    fn epoch_to_start(&self) -> Epoch {
        if self.base_data.shuffled_out {
            self.start_epoch
        } else {
            self.base_data.last_epoch
        }
    }

    fn prepare_from_storage(&self) -> BootstrapResult<Parameters> {
        let (registry, meta) = self.load_stored_checkpoint()?;
        let resolution = resolve_self_shard(
            &registry,
            &self.own_pub_key,
            self.config.destination_shard_as_observer,
            meta.num_shards(),
            self.genesis.self_shard_id,
        );
        let shard_id = apply_observer_override(
            resolution.shard_id,
            self.config.destination_shard_as_observer,
            resolution.is_validator,
        );
        info!(
            target: "bootstrap::driver",
            epoch = self.base_data.last_epoch, shard_id, "prepared from storage"
        );
        Ok(Parameters {
            epoch: self.epoch_to_start(),
            self_shard_id: shard_id,
            num_shards: meta.num_shards(),
            nodes_config: Some(registry),
        })
    }

    fn load_stored_checkpoint(
        &self,
    ) -> BootstrapResult<(NodesCoordinatorRegistry, EpochStartMetaBlock)> {
        let bootstrap_unit = self.opener.open(StorageUnit::Bootstrap)?;
        let epoch = self.base_data.last_epoch;

        let meta_bytes = bootstrap_unit
            .get(&epoch_start_key(epoch))?
            .ok_or_else(|| eyre::eyre!("no epoch start checkpoint for epoch {epoch}"))?;
        let meta: EpochStartMetaBlock = decode(&meta_bytes)
            .map_err(|_| BootstrapError::WrongTypeAssertion("epoch start metablock"))?;

        let registry_bytes = bootstrap_unit
            .get(&nodes_config_key(epoch))?
            .ok_or_else(|| eyre::eyre!("no stored validator registry for epoch {epoch}"))?;
        let registry: NodesCoordinatorRegistry = decode(&registry_bytes)
            .map_err(|_| BootstrapError::WrongTypeAssertion("nodes coordinator registry"))?;

        Ok((registry, meta))
    }

    async fn sync_from_network(&mut self) -> BootstrapResult<Parameters> {
        let coordinator = Arc::new(RequestCoordinator::new(
            Arc::clone(&self.messenger),
            Arc::clone(&self.whitelist),
            self.config.requests.clone(),
        ));
        self.create_request_topics()?;

        let tallies = CandidateTallies::new();
        let container = EpochStartInterceptorContainer::new(InterceptorContainerArgs {
            messenger: Arc::clone(&self.messenger),
            pools: Arc::clone(&self.pools),
            whitelist: Arc::clone(&self.whitelist),
            integrity: Arc::clone(&self.integrity),
            signer: Arc::clone(&self.signer),
            tallies: Arc::clone(&tallies),
            chain_id: self.genesis.chain_id.clone(),
            num_shards: self.genesis.num_shards,
            tx_signed_with_hash_enable_epoch: self.config.tx_signed_with_hash_enable_epoch,
        })?;

        let shutdown = self.shutdown.subscribe();
        let locator = EpochStartMetaLocator::new(
            Arc::clone(&coordinator),
            Arc::clone(&self.pools),
            tallies,
            self.config.min_num_connected_peers_to_start,
        );

        let meta = locator.sync_epoch_start_meta(self.config.time_to_wait, &shutdown).await?;
        info!(
            target: "bootstrap::driver",
            epoch = meta.epoch, nonce = meta.nonce, "got epoch start meta header"
        );
        self.status.set_u64(METRIC_NONCE_AT_EPOCH_START, meta.nonce);
        self.status.set_u64(METRIC_ROUND_AT_EPOCH_START, meta.round);
        container.set_current_epoch(meta.epoch);

        self.base_data.num_shards = meta.num_shards();
        self.base_data.last_epoch = meta.epoch;

        let ctx = NetworkContext {
            headers_syncer: HeadersByHashSyncer::new(
                Arc::clone(&self.pools),
                Arc::clone(&coordinator),
                self.config.requests.time_between_requests,
            ),
            coordinator,
            shutdown,
        };

        let mut synced_headers = self.sync_headers_from(&ctx, &meta).await?;
        debug!(target: "bootstrap::driver", count = synced_headers.len(), "got shard headers and previous epoch start metablock");

        let prev_meta = synced_headers
            .get(&meta.prev_epoch_start_hash)
            .and_then(BlockHeader::as_meta)
            .cloned()
            .ok_or(BootstrapError::WrongTypeAssertion("previous epoch start metablock"))?;

        let registry =
            derive_nodes_config(&self.genesis, self.shuffler.as_ref(), &meta, &prev_meta);
        let resolution = resolve_self_shard(
            &registry,
            &self.own_pub_key,
            self.config.destination_shard_as_observer,
            meta.num_shards(),
            self.genesis.self_shard_id,
        );
        let self_shard_id = apply_observer_override(
            resolution.shard_id,
            self.config.destination_shard_as_observer,
            resolution.is_validator,
        );
        self.base_data.shard_id = self_shard_id;
        debug!(
            target: "bootstrap::driver",
            num_shards = meta.num_shards(), self_shard_id, "nodes config processed"
        );

        self.messenger.create_topic(&Topic::Consensus(self_shard_id).name())?;

        let components = if self_shard_id == METACHAIN_SHARD_ID {
            self.request_and_process_for_meta(&ctx, &meta, &prev_meta, registry.clone(), synced_headers)
                .await?
        } else {
            self.request_and_process_for_shard(
                &ctx,
                &meta,
                &prev_meta,
                registry.clone(),
                &mut synced_headers,
                self_shard_id,
            )
            .await?
        };

        StorageWriter::new(Arc::clone(&self.opener)).save(&components)?;

        debug!(target: "bootstrap::driver", "removing cached received trie nodes");
        self.pools.trie_nodes.clear();

        Ok(Parameters {
            epoch: self.epoch_to_start(),
            self_shard_id,
            num_shards: meta.num_shards(),
            nodes_config: Some(registry),
        })
    }

    /// Join the request-side topics the coordinator publishes on.
    fn create_request_topics(&self) -> BootstrapResult<()> {
        self.messenger.create_topic(EPOCH_START_REQUEST_TOPIC)?;
        self.messenger.create_topic(&Topic::MetaHeaders.request_name())?;
        let mut shards: Vec<ShardId> = (0..self.genesis.num_shards).collect();
        shards.push(METACHAIN_SHARD_ID);
        for shard in shards {
            if shard != METACHAIN_SHARD_ID {
                self.messenger.create_topic(&Topic::ShardHeaders(shard).request_name())?;
            }
            self.messenger.create_topic(&Topic::MiniBlocks(shard).request_name())?;
            self.messenger.create_topic(&Topic::TrieNodes(shard).request_name())?;
        }
        Ok(())
    }

    /// Fan out for every shard's last finalized header plus the previous
    /// epoch-start metablock.
    async fn sync_headers_from(
        &self,
        ctx: &NetworkContext,
        meta: &EpochStartMetaBlock,
    ) -> BootstrapResult<HashMap<Hash, BlockHeader>> {
        let mut targets: Vec<(ShardId, Hash)> = meta
            .last_finalized_headers
            .iter()
            .map(|data| (data.shard_id, data.header_hash))
            .collect();

        // at the first post-genesis epoch there is no previous epoch start
        // metablock to fetch
        if meta.epoch > self.start_epoch + 1 {
            targets.push((METACHAIN_SHARD_ID, meta.prev_epoch_start_hash));
        }

        ctx.headers_syncer
            .sync_missing_headers(&targets, self.config.time_to_wait, &ctx.shutdown)
            .await?;
        let mut synced = ctx.headers_syncer.headers()?;

        if meta.epoch == self.start_epoch + 1 {
            synced.insert(
                meta.prev_epoch_start_hash,
                BlockHeader::Meta(EpochStartMetaBlock::default()),
            );
        }

        Ok(synced)
    }

    /// Metachain branch: peer-accounts trie, then user-accounts trie.
    async fn request_and_process_for_meta(
        &self,
        ctx: &NetworkContext,
        meta: &EpochStartMetaBlock,
        prev_meta: &EpochStartMetaBlock,
        nodes_config: NodesCoordinatorRegistry,
        headers: HashMap<Hash, BlockHeader>,
    ) -> BootstrapResult<BootstrapComponents> {
        debug!(target: "bootstrap::driver", "started syncing peer accounts state");
        self.trie_syncer(
            Arc::clone(&self.peer_trie_storage),
            METACHAIN_SHARD_ID,
            self.config.trie_sync.max_peer_trie_level_in_memory,
            ctx,
        )?
        .sync_trie(meta.validator_stats_root_hash)
        .await?;

        debug!(target: "bootstrap::driver", "started syncing user accounts state");
        self.trie_syncer(
            Arc::clone(&self.user_trie_storage),
            METACHAIN_SHARD_ID,
            self.config.trie_sync.max_state_trie_level_in_memory,
            ctx,
        )?
        .sync_trie(meta.root_hash)
        .await?;

        Ok(BootstrapComponents {
            epoch_start_meta: meta.clone(),
            prev_epoch_start: prev_meta.clone(),
            own_shard_header: None,
            nodes_config,
            headers,
            pending_mini_blocks: HashMap::new(),
            self_shard_id: METACHAIN_SHARD_ID,
            num_shards: meta.num_shards(),
        })
    }

    /// Shard branch: pending mini-blocks, referenced metablocks, own header's
    /// user-accounts trie.
    async fn request_and_process_for_shard(
        &self,
        ctx: &NetworkContext,
        meta: &EpochStartMetaBlock,
        prev_meta: &EpochStartMetaBlock,
        nodes_config: NodesCoordinatorRegistry,
        synced_headers: &mut HashMap<Hash, BlockHeader>,
        self_shard_id: ShardId,
    ) -> BootstrapResult<BootstrapComponents> {
        let shard_data = meta
            .shard_data(self_shard_id)
            .ok_or(BootstrapError::EpochStartDataNotFound(self_shard_id))?
            .clone();

        let mini_blocks_syncer = PendingMiniBlocksSyncer::new(
            Arc::clone(&self.pools),
            Arc::clone(&ctx.coordinator),
            self.config.requests.time_between_requests,
        );
        mini_blocks_syncer
            .sync_pending_mini_blocks(
                &shard_data.pending_mini_block_headers,
                self.config.time_to_wait,
                &ctx.shutdown,
            )
            .await?;
        let pending_mini_blocks = mini_blocks_syncer.mini_blocks()?;
        debug!(target: "bootstrap::driver", count = pending_mini_blocks.len(), "got pending mini blocks");

        // the two metablocks bracketing this shard's unprocessed cross-shard
        // work
        ctx.headers_syncer.clear_fields();
        let targets = [
            (METACHAIN_SHARD_ID, shard_data.last_finished_meta_block),
            (METACHAIN_SHARD_ID, shard_data.first_pending_meta_block),
        ];
        ctx.headers_syncer
            .sync_missing_headers(&targets, self.config.time_to_wait, &ctx.shutdown)
            .await?;
        for (hash, header) in ctx.headers_syncer.headers()? {
            synced_headers.insert(hash, header);
        }

        let own_shard_header = synced_headers
            .get(&shard_data.header_hash)
            .and_then(BlockHeader::as_shard)
            .cloned()
            .ok_or(BootstrapError::WrongTypeAssertion("own shard header"))?;

        debug!(target: "bootstrap::driver", "started syncing user accounts state");
        self.trie_syncer(
            Arc::clone(&self.user_trie_storage),
            self_shard_id,
            self.config.trie_sync.max_state_trie_level_in_memory,
            ctx,
        )?
        .sync_trie(own_shard_header.root_hash)
        .await?;

        Ok(BootstrapComponents {
            epoch_start_meta: meta.clone(),
            prev_epoch_start: prev_meta.clone(),
            own_shard_header: Some(own_shard_header),
            nodes_config,
            headers: synced_headers.clone(),
            pending_mini_blocks,
            self_shard_id,
            num_shards: meta.num_shards(),
        })
    }

    fn trie_syncer(
        &self,
        storage: Arc<dyn TrieStorageManager>,
        shard_id: ShardId,
        max_level_in_memory: u8,
        ctx: &NetworkContext,
    ) -> BootstrapResult<TrieSyncer> {
        TrieSyncer::new(TrieSyncerArgs {
            storage,
            pools: Arc::clone(&self.pools),
            coordinator: Arc::clone(&ctx.coordinator),
            shard_id,
            config: self.config.trie_sync.clone(),
            max_level_in_memory,
            request_cadence: self.config.requests.time_between_requests,
            shutdown: ctx.shutdown.clone(),
        })
    }
}

#[cfg(test)]
#[path = "tests/driver_tests.rs"]
mod driver_tests;
