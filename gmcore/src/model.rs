//! Named alignment model operations
//!
//! Save, load, delete and clear run on the command channel. Every operation
//! that changes the active model is followed by an alignment refresh, during
//! which the store's `loading` flag is up.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use gmwire::{
    alignment_stars, batches, escape_log, model_delete, model_load, model_names, model_save,
    parse_alignment_header, parse_alignment_stars, parse_count, parse_model_names,
    validate_model_name, AlignmentInfo, AlignmentStar, MountError, MountResult, Reply,
    CLEAR_ALIGNMENT,
};

use crate::command::CommandChannel;
use crate::context::CoreContext;
use crate::events::MountEvent;

#[derive(Clone)]
pub struct ModelOps {
    channel: Arc<CommandChannel>,
    ctx: CoreContext,
    settle: Duration,
    loading_timeout: Duration,
    /// Model operations never overlap
    exclusive: Arc<Mutex<()>>,
}

impl ModelOps {
    pub fn new(
        channel: Arc<CommandChannel>,
        ctx: CoreContext,
        settle: Duration,
        loading_timeout: Duration,
    ) -> Self {
        Self {
            channel,
            ctx,
            settle,
            loading_timeout,
            exclusive: Arc::new(Mutex::new(())),
        }
    }

    fn lock(&self) -> MountResult<MutexGuard<'_, ()>> {
        let guard = self.exclusive.lock().unwrap_or_else(PoisonError::into_inner);
        if self.ctx.store.is_loading() {
            return Err(MountError::Busy);
        }
        Ok(guard)
    }

    /// Send a model command and check the mount's success marker
    fn mutate(&self, what: &str, name: &str, command: String) -> MountResult<()> {
        let reply = self.channel.request(command)?;
        if !reply.ends_with_success() {
            warn!("model {} '{}' refused: {}", what, name, escape_log(reply.as_str()));
            return Err(MountError::refused(format!(
                "{} of model '{}' refused",
                what, name
            )));
        }
        info!("model {} '{}' done", what, name);
        Ok(())
    }

    /// Store the active model under `name`, replacing any model of that name
    pub fn save(&self, name: &str) -> MountResult<()> {
        validate_model_name(name)?;
        let _guard = self.lock()?;
        self.mutate("save", name, model_save(name))?;
        self.refresh_names()?;
        Ok(())
    }

    /// Make the stored model `name` active. Returns once the new alignment
    /// has been read back.
    pub fn load(&self, name: &str) -> MountResult<()> {
        validate_model_name(name)?;
        let _guard = self.lock()?;
        self.mutate("load", name, model_load(name))?;
        self.reload_alignment()?;
        self.refresh_names()?;
        Ok(())
    }

    pub fn delete(&self, name: &str) -> MountResult<()> {
        validate_model_name(name)?;
        let _guard = self.lock()?;
        self.mutate("delete", name, model_delete(name))?;
        self.reload_alignment()?;
        self.refresh_names()?;
        Ok(())
    }

    /// Drop the active alignment
    pub fn clear(&self) -> MountResult<()> {
        let _guard = self.lock()?;
        let reply = self.channel.request(CLEAR_ALIGNMENT)?;
        debug!("clear alignment answered {}", escape_log(reply.as_str()));
        if !reply.ends_with_success() {
            warn!("clear alignment refused: {}", escape_log(reply.as_str()));
            return Err(MountError::refused("clear alignment refused"));
        }
        thread::sleep(self.settle);
        self.reload_alignment()
    }

    /// Re-read the stored model names
    pub fn refresh_names(&self) -> MountResult<Vec<String>> {
        let reply = self.channel.request(batches::MODEL_COUNT)?;
        let count = first_count(&reply)?;
        let names = if count == 0 {
            Vec::new()
        } else {
            let reply = self.channel.request(model_names(count))?;
            parse_model_names(reply.as_str(), count)?
        };
        debug!("{} stored models", names.len());
        self.ctx.store.set_model_names(names.clone());
        self.ctx
            .bus
            .publish(MountEvent::ModelNamesRefreshed(names.len()));
        Ok(names)
    }

    /// Re-read the active alignment and wait for it. Returns the star count.
    pub fn refresh_alignment(&self) -> MountResult<usize> {
        let _guard = self.lock()?;
        self.reload_alignment()?;
        Ok(self.ctx.store.model().star_list.len())
    }

    /// Raise `loading`, read the alignment on a worker thread and block
    /// until the flag drops again
    fn reload_alignment(&self) -> MountResult<()> {
        self.ctx.store.begin_loading()?;
        let worker = self.clone();
        let spawned = thread::Builder::new()
            .name("gm-alignment".to_string())
            .spawn(move || worker.read_and_store_alignment());
        if let Err(e) = spawned {
            self.ctx.store.finish_loading(Err(e.to_string()));
            return Err(e.into());
        }
        self.ctx.store.wait_until_loaded(self.loading_timeout)
    }

    fn read_and_store_alignment(&self) {
        match self.read_alignment() {
            Ok((info, stars)) => {
                let count = stars.len();
                self.ctx.store.finish_loading(Ok((info, stars)));
                let generation = self.ctx.store.model().generation;
                info!("alignment refreshed, {} stars", count);
                self.ctx.bus.publish(MountEvent::AlignmentRefreshed {
                    stars: count,
                    generation,
                });
            }
            Err(e) => {
                warn!("alignment refresh failed: {}", e);
                self.ctx.store.finish_loading(Err(e.to_string()));
            }
        }
    }

    fn read_alignment(&self) -> MountResult<(AlignmentInfo, Vec<AlignmentStar>)> {
        let header = self.channel.request(batches::ALIGNMENT_HEADER)?;
        let (info, count) = parse_alignment_header(header.as_str())?;
        if count == 0 {
            return Ok((info, Vec::new()));
        }
        let reply = self.channel.request(alignment_stars(count))?;
        let stars = parse_alignment_stars(reply.as_str(), count)?;
        Ok((info, stars))
    }
}

fn first_count(reply: &Reply) -> MountResult<usize> {
    let fields = reply.fields();
    let first = fields.first().ok_or(MountError::ParseShort {
        expected: 1,
        got: 0,
    })?;
    parse_count(first)
}
