use embassy_time::Instant;
use embedded_hal::digital::InputPin;
use embedded_io::{Read, ReadReady};

use crate::catalog::{Catalog, ClipId};
use crate::codec::Codec;
use crate::config::Config;
use crate::console::{Command, Console};
use crate::error::{CodecError, ConfigError, NetworkError, SessionError};
use crate::input::Button;
use crate::management::{ManagementService, Served, Transport};
use crate::selector::Selector;
use crate::session::{Session, Step};
use crate::storage::Storage;

/// Device control outside the engine.
pub trait System {
    /// Flushes pending diagnostics and restarts the device. Does not return on hardware.
    fn restart(&mut self);
}

/// The set of capabilities a board provides to the engine.
pub trait Board {
    type PlayPin: InputPin;
    type ResetPin: InputPin;
    type Storage: Storage;
    type Codec: Codec<Reader = <Self::Storage as Storage>::Reader>;
    type Console: Read + ReadReady;
    type Transport: Transport;
    type System: System;
}

pub struct Devices<B: Board> {
    pub play: B::PlayPin,
    pub reset: B::ResetPin,
    pub storage: B::Storage,
    pub codec: B::Codec,
    pub console: B::Console,
    pub transport: B::Transport,
    pub system: B::System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    Served(Served),
    ManagementEnabled,
    ManagementFailed(NetworkError),
    Started(ClipId),
    StartFailed(ClipId, SessionError),
    /// Play was pressed while a clip was playing.
    PressIgnored,
    Restarting,
    Finished(ClipId),
    PlaybackFailed(ClipId, CodecError),
}

/// What happened during one [`Jukebox::tick`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    events: heapless::Vec<Event, 8>,
}

impl Report {
    fn push(&mut self, event: Event) {
        // A tick produces at most one event per step.
        let _ = self.events.push(event);
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }
}

/// The event loop: owns every component and runs one bounded iteration per [`tick`].
///
/// [`tick`]: Jukebox::tick
pub struct Jukebox<B: Board> {
    catalog: Catalog,
    selector: Selector,
    play: Button<B::PlayPin>,
    reset: Button<B::ResetPin>,
    session: Session<B::Codec>,
    storage: B::Storage,
    codec: B::Codec,
    console: Console<B::Console>,
    transport: B::Transport,
    system: B::System,
    management: ManagementService<B::Storage>,
}

impl<B: Board> Jukebox<B> {
    /// Validates `config`, audits the catalog if configured and enables the management
    /// service if it should run from boot. `seed` comes from the hardware RNG.
    pub fn new(config: &Config, devices: Devices<B>, seed: u64) -> Result<Self, ConfigError> {
        config.validate()?;
        let catalog = Catalog::from_config(config)?;
        let window = config.debounce_window();

        let mut jukebox = Self {
            selector: Selector::new(seed),
            play: Button::new(devices.play, window),
            reset: Button::new(devices.reset, window),
            session: Session::new(),
            storage: devices.storage,
            codec: devices.codec,
            console: Console::new(devices.console, &config.enable_command),
            transport: devices.transport,
            system: devices.system,
            management: ManagementService::new(),
            catalog,
        };

        if config.audit_on_boot {
            jukebox.catalog.audit(&mut jukebox.storage);
        }
        if config.management_on_boot {
            jukebox.enable_management();
        }

        Ok(jukebox)
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn session(&self) -> &Session<B::Codec> {
        &self.session
    }

    pub fn is_playing(&self) -> bool {
        self.session.is_active()
    }

    pub fn management(&self) -> &ManagementService<B::Storage> {
        &self.management
    }

    /// One loop iteration. Every step does a bounded amount of work and never waits.
    pub fn tick(&mut self, now: Instant) -> Report {
        let mut report = Report::default();

        let busy = self.session.is_active();
        if let Some(served) =
            self.management
                .service(&mut self.transport, &mut self.storage, &self.catalog, busy)
        {
            report.push(Event::Served(served));
        }

        if let Some(Command::EnableManagement) = self.console.poll() {
            if let Some(event) = self.enable_management() {
                report.push(event);
            }
        }

        if self.play.poll(now).is_some() {
            report.push(self.play());
        }

        if self.reset.poll(now).is_some() {
            if let Some(clip) = self.session.stop() {
                info!("Stopped clip {} for reset", clip);
            }
            warn!("Reset pressed, restarting");
            report.push(Event::Restarting);
            self.system.restart();
            return report;
        }

        match self.session.step(&mut self.codec) {
            Step::Idle => self.codec.idle(),
            Step::Playing => {}
            Step::Finished(clip) => {
                info!("Finished clip {}", clip);
                report.push(Event::Finished(clip));
            }
            Step::Failed(clip, err) => {
                warn!("Playback of clip {} failed: {}", clip, err);
                report.push(Event::PlaybackFailed(clip, err));
            }
        }

        report
    }

    fn play(&mut self) -> Event {
        if self.session.is_active() {
            debug!("Play pressed while playing, ignored");
            return Event::PressIgnored;
        }

        let clip = self.selector.pick(&self.catalog);
        let name = self.catalog.name_of(clip);
        if self
            .management
            .replacing()
            .is_some_and(|target| target.eq_ignore_ascii_case(&name))
        {
            warn!("Cannot play {}: upload is being committed", name.as_str());
            return Event::StartFailed(clip, SessionError::ResourceUnavailable);
        }
        match self
            .session
            .start(&mut self.storage, &mut self.codec, clip, &name)
        {
            Ok(()) => {
                info!("Playing {}", name.as_str());
                Event::Started(clip)
            }
            Err(err) => {
                warn!("Cannot play {}: {}", name.as_str(), err);
                Event::StartFailed(clip, err)
            }
        }
    }

    fn enable_management(&mut self) -> Option<Event> {
        if self.management.is_enabled() {
            info!("Management service already enabled");
            return None;
        }

        match self.transport.enable() {
            Ok(()) => {
                self.management.enable();
                info!("Management service enabled");
                Some(Event::ManagementEnabled)
            }
            Err(err) => {
                error!("Management service unavailable: {}", err);
                Some(Event::ManagementFailed(err))
            }
        }
    }
}
