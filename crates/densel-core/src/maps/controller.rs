use super::settings::{
    DisplaySettings, MapCentre, MapStyle, MtzColumns, OtherMapColouring, SuggestedSettings,
};
use super::source::{ByteSource, Fetcher};
use crate::core::buffer::{BufferId, Renderer};
use crate::core::colour::Rgb;
use crate::core::partition::{ColourIndexPartition, Lobe};
use crate::core::sync::{self, DifferenceBuffers, DifferenceStyle, RecolourPath, StandardStyle};
use crate::engine::centre::CommandCentre;
use crate::engine::command::CommandDescriptor;
use crate::engine::config::MapDefaults;
use crate::engine::error::EngineError;
use crate::engine::protocol::ReturnShape;
use nalgebra::Point3;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapState {
    Unloaded,
    Loading,
    Loaded,
    Contoured,
    Disposed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StandardMap {
    pub colour: Rgb,
    pub buffer: Option<BufferId>,
    /// When set, contours carry engine colours taken from another map.
    pub colouring: Option<OtherMapColouring>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DifferenceMap {
    pub positive_colour: Rgb,
    pub negative_colour: Rgb,
    pub buffers: Option<DifferenceBuffers>,
    pub partition: Option<ColourIndexPartition>,
}

impl DifferenceMap {
    fn style(&self, alpha: f32) -> DifferenceStyle {
        DifferenceStyle {
            positive: self.positive_colour,
            negative: self.negative_colour,
            alpha,
        }
    }

    fn colour_mut(&mut self, lobe: Lobe) -> &mut Rgb {
        match lobe {
            Lobe::Positive => &mut self.positive_colour,
            Lobe::Negative => &mut self.negative_colour,
        }
    }
}

/// The two mutually exclusive rendering branches of a map.
#[derive(Debug, Clone, PartialEq)]
pub enum MapVariant {
    Standard(StandardMap),
    Difference(DifferenceMap),
}

impl MapVariant {
    fn new(is_difference: bool, defaults: &MapDefaults) -> Self {
        if is_difference {
            MapVariant::Difference(DifferenceMap {
                positive_colour: defaults.positive_colour,
                negative_colour: defaults.negative_colour,
                buffers: None,
                partition: None,
            })
        } else {
            MapVariant::Standard(StandardMap {
                colour: defaults.colour,
                buffer: None,
                colouring: None,
            })
        }
    }

    /// A fresh variant of the loaded kind that keeps any colours chosen
    /// before the load finished.
    fn reloaded(&self, is_difference: bool, defaults: &MapDefaults) -> Self {
        let mut variant = MapVariant::new(is_difference, defaults);
        match (self, &mut variant) {
            (MapVariant::Standard(old), MapVariant::Standard(new)) => new.colour = old.colour,
            (MapVariant::Difference(old), MapVariant::Difference(new)) => {
                new.positive_colour = old.positive_colour;
                new.negative_colour = old.negative_colour;
            }
            _ => {}
        }
        variant
    }

    pub fn is_difference(&self) -> bool {
        matches!(self, MapVariant::Difference(_))
    }

    fn detach_buffers(&mut self) -> Vec<BufferId> {
        match self {
            MapVariant::Standard(map) => map.buffer.take().into_iter().collect(),
            MapVariant::Difference(map) => {
                map.partition = None;
                map.buffers
                    .take()
                    .map(|b| vec![b.positive, b.negative])
                    .unwrap_or_default()
            }
        }
    }

    fn without_buffers(&self) -> Self {
        let mut copy = self.clone();
        copy.detach_buffers();
        copy
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapHistogram {
    pub base: f64,
    pub bin_width: f64,
    pub counts: Vec<u64>,
}

#[derive(Debug)]
struct MapEntity {
    molecule: Option<i64>,
    name: String,
    variant: MapVariant,
    display: DisplaySettings,
    suggested: Option<SuggestedSettings>,
    /// Name of reflection data associated with the map on the engine side.
    reflections: Option<String>,
}

impl MapEntity {
    fn new(defaults: &MapDefaults) -> Self {
        Self {
            molecule: None,
            name: String::new(),
            variant: MapVariant::new(false, defaults),
            display: DisplaySettings::from_defaults(defaults),
            suggested: None,
            reflections: None,
        }
    }
}

struct ReadOutcome {
    molecule: i64,
    name: String,
    is_difference: Option<bool>,
    reflections: Option<String>,
}

/// Owns one volumetric dataset on the compute engine and keeps its contour
/// buffers in sync with its display parameters.
///
/// Operations on one controller must not overlap; loads in particular are
/// not guarded against each other. Once [`MapController::dispose`] runs, every
/// engine result that arrives later is discarded.
pub struct MapController<R: Renderer> {
    centre: Arc<CommandCentre>,
    renderer: Arc<Mutex<R>>,
    fetcher: Fetcher,
    defaults: MapDefaults,
    entity: Mutex<MapEntity>,
    state: watch::Sender<MapState>,
    torn_down: AtomicBool,
}

impl<R: Renderer> MapController<R> {
    pub fn new(centre: Arc<CommandCentre>, renderer: Arc<Mutex<R>>) -> Self {
        let defaults = centre.config().maps.clone();
        Self {
            entity: Mutex::new(MapEntity::new(&defaults)),
            defaults,
            centre,
            renderer,
            fetcher: Fetcher::new(),
            state: watch::channel(MapState::Unloaded).0,
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn with_fetcher(mut self, fetcher: Fetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    fn entity(&self) -> MutexGuard<'_, MapEntity> {
        self.entity.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn renderer(&self) -> MutexGuard<'_, R> {
        self.renderer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: MapState) {
        debug!("Map state -> {:?}", state);
        self.state.send_replace(state);
    }

    pub fn state(&self) -> MapState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<MapState> {
        self.state.subscribe()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    pub fn molecule(&self) -> Option<i64> {
        self.entity().molecule
    }

    pub fn name(&self) -> String {
        self.entity().name.clone()
    }

    pub fn is_difference(&self) -> bool {
        self.entity().variant.is_difference()
    }

    pub fn variant(&self) -> MapVariant {
        self.entity().variant.clone()
    }

    pub fn display(&self) -> DisplaySettings {
        self.entity().display.clone()
    }

    pub fn suggested(&self) -> Option<SuggestedSettings> {
        self.entity().suggested.clone()
    }

    pub fn has_reflections(&self) -> bool {
        self.entity().reflections.is_some()
    }

    /// The engine handle if the map is in a state that accepts `op`.
    fn usable_molecule(&self, entity: &MapEntity, op: &str) -> Option<i64> {
        match (self.state(), entity.molecule) {
            (MapState::Loaded | MapState::Contoured, Some(molecule)) => Some(molecule),
            (state, _) => {
                error!("Cannot {} a map in state {:?}.", op, state);
                None
            }
        }
    }

    fn loaded_molecule(&self, op: &str) -> Option<i64> {
        let entity = self.entity();
        self.usable_molecule(&entity, op)
    }

    async fn query<T: DeserializeOwned>(
        &self,
        descriptor: CommandDescriptor,
    ) -> Result<T, EngineError> {
        let command = descriptor.command.clone();
        self.centre.command(descriptor, false).await?.decode(&command)
    }

    async fn read_molecule(&self, descriptor: CommandDescriptor) -> Result<i64, EngineError> {
        let command = descriptor.command.clone();
        let molecule: i64 = self.centre.command(descriptor, true).await?.decode(&command)?;
        if molecule < 0 {
            return Err(EngineError::Remote {
                command,
                diagnostic: "the engine could not read the map data".to_string(),
            });
        }
        Ok(molecule)
    }

    /// Asks the engine to close a handle nobody will own.
    fn close_detached(&self, molecule: i64) {
        match self.centre.issue(close_molecule(molecule), true) {
            Ok(pending) => drop(pending),
            Err(e) => warn!("Could not close orphaned map {}: {}", molecule, e),
        }
    }

    fn begin_load(&self, op: &str) -> bool {
        let _entity = self.entity();
        match self.state() {
            MapState::Unloaded => {
                self.set_state(MapState::Loading);
                true
            }
            state => {
                error!("Cannot {} into a map in state {:?}.", op, state);
                false
            }
        }
    }

    /// Loads CCP4 map data. `is_difference` overrides the engine's own
    /// inference when given.
    #[instrument(skip_all, fields(source = %source.name()))]
    pub async fn load_map(
        &self,
        source: ByteSource,
        is_difference: Option<bool>,
    ) -> Result<(), EngineError> {
        if !self.begin_load("load") {
            return Ok(());
        }
        let read = self.read_ccp4(source, is_difference).await;
        self.complete_load(read).await
    }

    /// Loads a map computed from the selected reflection columns.
    #[instrument(skip_all, fields(source = %source.name(), f = %columns.f, phi = %columns.phi))]
    pub async fn load_mtz(
        &self,
        source: ByteSource,
        columns: MtzColumns,
    ) -> Result<(), EngineError> {
        if !self.begin_load("load") {
            return Ok(());
        }
        let read = self.read_mtz(source, columns).await;
        self.complete_load(read).await
    }

    async fn read_ccp4(
        &self,
        source: ByteSource,
        is_difference: Option<bool>,
    ) -> Result<ReadOutcome, EngineError> {
        let name = source.name();
        let data = self.fetcher.fetch(source).await?;
        let molecule = self
            .read_molecule(
                CommandDescriptor::new("read_ccp4_map", ReturnShape::Int)
                    .bytes(data)
                    .arg(name.as_str())
                    .arg(is_difference.unwrap_or(false))
                    .changes_molecules(),
            )
            .await?;
        Ok(ReadOutcome {
            molecule,
            name,
            is_difference,
            reflections: None,
        })
    }

    async fn read_mtz(
        &self,
        source: ByteSource,
        columns: MtzColumns,
    ) -> Result<ReadOutcome, EngineError> {
        let name = source.name();
        let data = self.fetcher.fetch(source).await?;
        let selection = serde_json::to_value(&columns)
            .map_err(|e| EngineError::Internal(format!("column selection: {}", e)))?;
        let reflection_data = columns.observations().is_some().then(|| data.clone());

        let molecule = self
            .read_molecule(
                CommandDescriptor::new("shim_read_mtz", ReturnShape::Int)
                    .bytes(data)
                    .arg(name.as_str())
                    .arg(selection)
                    .changes_molecules(),
            )
            .await?;

        let mut reflections = None;
        if let (Some((fobs, sig_fobs, free_r)), Some(data)) =
            (columns.observations(), reflection_data)
        {
            let associate = CommandDescriptor::new(
                "associate_data_mtz_file_with_map",
                ReturnShape::Status,
            )
            .arg(molecule)
            .bytes(data)
            .arg(name.as_str())
            .arg(fobs)
            .arg(sig_fobs)
            .arg(free_r)
            .changes_molecules();
            if let Err(e) = self.centre.command(associate, true).await {
                self.close_detached(molecule);
                return Err(e);
            }
            reflections = Some(name.clone());
        }

        Ok(ReadOutcome {
            molecule,
            name,
            is_difference: columns.is_difference,
            reflections,
        })
    }

    async fn complete_load(
        &self,
        read: Result<ReadOutcome, EngineError>,
    ) -> Result<(), EngineError> {
        let read = match read {
            Ok(read) => read,
            Err(e) => return self.abort_load(e),
        };
        let (is_difference, suggested) =
            match self.fetch_suggested(read.molecule, read.is_difference).await {
                Ok(found) => found,
                Err(e) => {
                    self.close_detached(read.molecule);
                    return self.abort_load(e);
                }
            };

        let mut entity = self.entity();
        if self.is_torn_down() {
            debug!("Map was disposed while loading; closing {}.", read.molecule);
            self.close_detached(read.molecule);
            return Ok(());
        }
        entity.molecule = Some(read.molecule);
        entity.name = read.name;
        entity.reflections = read.reflections;
        entity.variant = entity.variant.reloaded(is_difference, &self.defaults);
        entity.display.contour_level = suggested.contour_level;
        entity.display.origin = suggested.centre;
        info!(
            "Loaded map '{}' as {} (difference: {}, level {:.3}).",
            entity.name, read.molecule, is_difference, suggested.contour_level
        );
        entity.suggested = Some(suggested);
        self.set_state(MapState::Loaded);
        Ok(())
    }

    fn abort_load(&self, e: EngineError) -> Result<(), EngineError> {
        let _entity = self.entity();
        if !self.is_torn_down() {
            self.set_state(MapState::Unloaded);
        }
        warn!("Map load failed: {}", e);
        Err(e)
    }

    async fn fetch_suggested(
        &self,
        molecule: i64,
        explicit_difference: Option<bool>,
    ) -> Result<(bool, SuggestedSettings), EngineError> {
        let (is_difference, is_em, rmsd, weight, centre) = tokio::try_join!(
            async {
                match explicit_difference {
                    Some(flag) => Ok(flag),
                    None => {
                        self.query(map_query("is_a_difference_map", ReturnShape::Boolean, molecule))
                            .await
                    }
                }
            },
            self.query::<bool>(map_query("is_EM_map", ReturnShape::Boolean, molecule)),
            self.query::<f64>(map_query("get_map_rmsd_approx", ReturnShape::Float, molecule)),
            self.query::<f64>(map_query("get_map_weight", ReturnShape::Float, molecule)),
            self.query::<MapCentre>(map_query(
                "get_map_molecule_centre",
                ReturnShape::Json,
                molecule
            ))
        )?;

        let contour_level = if is_em {
            rmsd * self.defaults.em_rmsd_multiplier
        } else {
            self.query(map_query(
                "get_suggested_initial_contour_level",
                ReturnShape::Float,
                molecule,
            ))
            .await?
        };

        Ok((
            is_difference,
            SuggestedSettings {
                rmsd,
                weight,
                centre: centre.updated_centre,
                contour_level,
                radius: centre.suggested_radius,
                is_em,
            },
        ))
    }

    /// Fetches a contour mesh for the current display parameters and
    /// synchronizes the display buffers with it.
    #[instrument(skip_all)]
    pub async fn draw_map_contour(&self) -> Result<(), EngineError> {
        let (molecule, display, colouring) = {
            let entity = self.entity();
            let Some(molecule) = self.usable_molecule(&entity, "contour") else {
                return Ok(());
            };
            let colouring = match &entity.variant {
                MapVariant::Standard(map) => map.colouring,
                MapVariant::Difference(_) => None,
            };
            (molecule, entity.display.clone(), colouring)
        };

        let descriptor = contour_descriptor(molecule, &display, colouring);
        let command = descriptor.command.clone();
        let shape = descriptor.return_shape;
        let reply = self.centre.command(descriptor, false).await?;

        let mut entity = self.entity();
        if self.is_torn_down() {
            debug!("Discarding '{}' result for a disposed map.", command);
            return Ok(());
        }
        let mesh = reply.decode_mesh(&command, shape)?;
        let alpha = entity.display.alpha;
        let mut renderer = self.renderer();
        match &mut entity.variant {
            MapVariant::Standard(map) => {
                let style = StandardStyle {
                    colour: map.colour,
                    alpha,
                    keep_engine_colours: map.colouring.is_some(),
                };
                let (id, outcome) = sync::sync_standard(&mut *renderer, map.buffer, mesh, style);
                debug!(?outcome, "Synchronized map buffer.");
                map.buffer = Some(id);
            }
            MapVariant::Difference(map) => {
                let (buffers, partition) =
                    sync::sync_difference(&mut *renderer, map.buffers, mesh, map.style(alpha));
                map.buffers = Some(buffers);
                map.partition = Some(partition);
            }
        }
        sync::finish_pass(&mut *renderer);
        self.set_state(MapState::Contoured);
        Ok(())
    }

    async fn recontour(
        &self,
        op: &str,
        change: impl FnOnce(&mut DisplaySettings),
    ) -> Result<(), EngineError> {
        {
            let mut entity = self.entity();
            if self.usable_molecule(&entity, op).is_none() {
                return Ok(());
            }
            change(&mut entity.display);
        }
        self.draw_map_contour().await
    }

    pub async fn set_contour_level(&self, level: f64) -> Result<(), EngineError> {
        if !level.is_finite() {
            error!("Ignoring non-finite contour level {}.", level);
            return Ok(());
        }
        self.recontour("set the contour level of", |d| d.contour_level = level)
            .await
    }

    pub async fn set_radius(&self, radius: f64) -> Result<(), EngineError> {
        if !(radius.is_finite() && radius > 0.0) {
            error!("Ignoring invalid map radius {}.", radius);
            return Ok(());
        }
        self.recontour("set the radius of", |d| d.radius = radius)
            .await
    }

    pub async fn set_style(&self, style: MapStyle) -> Result<(), EngineError> {
        self.recontour("restyle", |d| d.style = style).await
    }

    pub async fn set_origin(&self, origin: Point3<f64>) -> Result<(), EngineError> {
        self.recontour("move", |d| d.origin = origin).await
    }

    /// Recolours a standard map without a new contour mesh.
    pub fn set_colour(&self, colour: Rgb) -> RecolourPath {
        let mut entity = self.entity();
        if self.is_torn_down() {
            error!("Cannot recolour a disposed map.");
            return RecolourPath::Skipped;
        }
        let alpha = entity.display.alpha;
        let map = match &mut entity.variant {
            MapVariant::Standard(map) => map,
            MapVariant::Difference(_) => {
                error!("A difference map has no single colour; set a lobe colour instead.");
                return RecolourPath::Skipped;
            }
        };
        map.colour = colour.clamped();
        let Some(id) = map.buffer else {
            return RecolourPath::Skipped;
        };
        if map.colouring.is_some() {
            debug!("Map is coloured by another map; keeping engine colours.");
            return RecolourPath::Skipped;
        }
        let mut renderer = self.renderer();
        let path = sync::recolour_standard(&mut *renderer, id, map.colour, alpha);
        finish_if_changed(&mut *renderer, path);
        path
    }

    /// Recolours one lobe of a difference map using the cached partition.
    pub fn set_difference_colour(&self, lobe: Lobe, colour: Rgb) -> RecolourPath {
        let mut entity = self.entity();
        if self.is_torn_down() {
            error!("Cannot recolour a disposed map.");
            return RecolourPath::Skipped;
        }
        let alpha = entity.display.alpha;
        let map = match &mut entity.variant {
            MapVariant::Difference(map) => map,
            MapVariant::Standard(_) => {
                error!("Lobe colours only apply to difference maps.");
                return RecolourPath::Skipped;
            }
        };
        *map.colour_mut(lobe) = colour.clamped();
        let (Some(buffers), Some(partition)) = (map.buffers, map.partition.as_ref()) else {
            return RecolourPath::Skipped;
        };
        let mut renderer = self.renderer();
        let path = sync::recolour_difference(
            &mut *renderer,
            buffers,
            partition,
            map.style(alpha),
            Some(lobe),
        );
        finish_if_changed(&mut *renderer, path);
        path
    }

    pub fn set_alpha(&self, alpha: f32) -> RecolourPath {
        if !(0.0..=1.0).contains(&alpha) {
            error!("Ignoring map alpha {} outside [0, 1].", alpha);
            return RecolourPath::Skipped;
        }
        let mut entity = self.entity();
        if self.is_torn_down() {
            error!("Cannot change the alpha of a disposed map.");
            return RecolourPath::Skipped;
        }
        entity.display.alpha = alpha;
        let mut renderer = self.renderer();
        let path = match &entity.variant {
            MapVariant::Standard(map) => match map.buffer {
                None => RecolourPath::Skipped,
                Some(id) if map.colouring.is_some() => {
                    sync::recolour_alpha(&mut *renderer, id, alpha)
                }
                Some(id) => sync::recolour_standard(&mut *renderer, id, map.colour, alpha),
            },
            MapVariant::Difference(map) => match (map.buffers, map.partition.as_ref()) {
                (Some(buffers), Some(partition)) => sync::recolour_difference(
                    &mut *renderer,
                    buffers,
                    partition,
                    map.style(alpha),
                    None,
                ),
                _ => RecolourPath::Skipped,
            },
        };
        finish_if_changed(&mut *renderer, path);
        path
    }

    /// Colours a standard map's contours by the values of another map, or
    /// restores the single colour when `None`.
    pub async fn set_colouring_source(
        &self,
        colouring: Option<OtherMapColouring>,
    ) -> Result<(), EngineError> {
        let contoured = {
            let mut entity = self.entity();
            if self.usable_molecule(&entity, "recolour").is_none() {
                return Ok(());
            }
            match &mut entity.variant {
                MapVariant::Standard(map) => map.colouring = colouring,
                MapVariant::Difference(_) => {
                    error!("Difference maps cannot be coloured by another map.");
                    return Ok(());
                }
            }
            self.state() == MapState::Contoured
        };
        if contoured {
            self.draw_map_contour().await?;
        }
        Ok(())
    }

    /// Copies the map on the engine side into a new, uncontoured controller.
    #[instrument(skip_all)]
    pub async fn duplicate(&self) -> Result<Option<MapController<R>>, EngineError> {
        let Some(molecule) = self.loaded_molecule("duplicate") else {
            return Ok(None);
        };
        let copy = self
            .read_molecule(
                CommandDescriptor::new("copy_molecule", ReturnShape::Int)
                    .arg(molecule)
                    .changes_molecules(),
            )
            .await?;

        let entity = self.entity();
        if self.is_torn_down() {
            self.close_detached(copy);
            return Ok(None);
        }
        let twin = MapController {
            centre: self.centre.clone(),
            renderer: self.renderer.clone(),
            fetcher: self.fetcher.clone(),
            defaults: self.defaults.clone(),
            entity: Mutex::new(MapEntity {
                molecule: Some(copy),
                name: format!("Copy of {}", entity.name),
                variant: entity.variant.without_buffers(),
                display: entity.display.clone(),
                suggested: entity.suggested.clone(),
                reflections: None,
            }),
            state: watch::channel(MapState::Loaded).0,
            torn_down: AtomicBool::new(false),
        };
        Ok(Some(twin))
    }

    /// Applies a B-factor sharpening (negative) or blurring (positive) in
    /// place, then re-contours if the map is displayed.
    pub async fn sharpen_blur(&self, b_factor: f64) -> Result<(), EngineError> {
        let Some(molecule) = self.loaded_molecule("sharpen") else {
            return Ok(());
        };
        self.centre
            .command(
                CommandDescriptor::new("sharpen_blur_map", ReturnShape::Status)
                    .arg(molecule)
                    .arg(b_factor)
                    .arg(true)
                    .changes_molecules(),
                true,
            )
            .await?;
        if !self.is_torn_down() && self.state() == MapState::Contoured {
            self.draw_map_contour().await?;
        }
        Ok(())
    }

    pub async fn histogram(&self, n_bins: u32) -> Result<Option<MapHistogram>, EngineError> {
        let Some(molecule) = self.loaded_molecule("histogram") else {
            return Ok(None);
        };
        let histogram = self
            .query(
                CommandDescriptor::new("get_map_histogram", ReturnShape::Json)
                    .arg(molecule)
                    .arg(n_bins)
                    .arg(1.0),
            )
            .await?;
        Ok((!self.is_torn_down()).then_some(histogram))
    }

    pub async fn fetch_map_centre(&self) -> Result<Option<MapCentre>, EngineError> {
        let Some(molecule) = self.loaded_molecule("centre") else {
            return Ok(None);
        };
        let centre: MapCentre = self
            .query(map_query("get_map_molecule_centre", ReturnShape::Json, molecule))
            .await?;
        let mut entity = self.entity();
        if self.is_torn_down() {
            return Ok(None);
        }
        if centre.success {
            if let Some(suggested) = entity.suggested.as_mut() {
                suggested.centre = centre.updated_centre;
                suggested.radius = centre.suggested_radius;
            }
        }
        Ok(Some(centre))
    }

    pub async fn export_map(&self) -> Result<Option<Vec<u8>>, EngineError> {
        let Some(molecule) = self.loaded_molecule("export") else {
            return Ok(None);
        };
        let data = self
            .query(map_query("export_map_molecule", ReturnShape::IntArray, molecule))
            .await?;
        Ok((!self.is_torn_down()).then_some(data))
    }

    /// Releases the display buffers and the engine-side resources.
    ///
    /// Results of requests still in flight are discarded when they arrive.
    #[instrument(skip_all)]
    pub async fn dispose(&self) -> Result<(), EngineError> {
        let (molecule, reflections) = {
            let mut entity = self.entity();
            if self.torn_down.swap(true, Ordering::SeqCst) {
                debug!("Map already disposed.");
                return Ok(());
            }
            let buffers = entity.variant.detach_buffers();
            if !buffers.is_empty() {
                let mut renderer = self.renderer();
                for id in buffers {
                    renderer.clear_buffers(id);
                    renderer.remove_buffer(id);
                }
                sync::finish_pass(&mut *renderer);
            }
            self.set_state(MapState::Disposed);
            (entity.molecule.take(), entity.reflections.take())
        };

        let Some(molecule) = molecule else {
            return Ok(());
        };
        if let Some(name) = reflections {
            self.centre
                .command(
                    CommandDescriptor::new("release_associated_data_mtz", ReturnShape::Status)
                        .arg(molecule)
                        .arg(name)
                        .changes_molecules(),
                    true,
                )
                .await?;
        }
        self.centre.command(close_molecule(molecule), true).await?;
        info!("Disposed map {}.", molecule);
        Ok(())
    }
}

fn map_query(command: &str, shape: ReturnShape, molecule: i64) -> CommandDescriptor {
    CommandDescriptor::new(command, shape).arg(molecule)
}

fn close_molecule(molecule: i64) -> CommandDescriptor {
    CommandDescriptor::new("close_molecule", ReturnShape::Status)
        .arg(molecule)
        .changes_molecules()
}

fn contour_descriptor(
    molecule: i64,
    display: &DisplaySettings,
    colouring: Option<OtherMapColouring>,
) -> CommandDescriptor {
    let origin = display.origin;
    let shape = display.style.return_shape();
    match colouring {
        None => CommandDescriptor::new("get_map_contours_mesh", shape)
            .arg(molecule)
            .arg(origin.x)
            .arg(origin.y)
            .arg(origin.z)
            .arg(display.radius)
            .arg(display.contour_level),
        Some(other) => {
            CommandDescriptor::new("get_map_contours_mesh_using_other_map_for_colours", shape)
                .arg(molecule)
                .arg(other.other_map)
                .arg(origin.x)
                .arg(origin.y)
                .arg(origin.z)
                .arg(display.radius)
                .arg(display.contour_level)
                .arg(other.min)
                .arg(other.max)
                .arg(other.absolute)
        }
    }
}

fn finish_if_changed(renderer: &mut dyn Renderer, path: RecolourPath) {
    if path != RecolourPath::Skipped {
        sync::finish_pass(renderer);
    }
}
