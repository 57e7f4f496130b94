use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread::JoinHandle,
};

use egui::{ScrollArea, Ui};
use log::error;

use crate::simulation_parameters::{
    DissipationMode, SimulationConfig, VisualizationParams, ALL_VISUALIZED_FIELDS, MAX_DOWNSAMPLE_SHIFT,
    MAX_PRESSURE_ITERATIONS,
};

/// State shared between the properties window and the thread running the simulation.
#[derive(Clone, Default)]
pub struct SharedControls {
    pub cancelled: Arc<Mutex<bool>>,
    // the simulation thread rebuilds its session from `config` when this is set
    pub restart: Arc<Mutex<bool>>,
    pub config: Arc<Mutex<SimulationConfig>>,
    pub visualization: Arc<Mutex<VisualizationParams>>,
}

/// A panicking holder cannot leave these plain values half-written.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SharedControls {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
            ..Self::default()
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *lock(&self.cancelled)
    }

    pub fn cancel(&self) {
        *lock(&self.cancelled) = true;
    }

    /// Returns the config to restart with, if a restart was requested since the last call.
    pub fn take_restart(&self) -> Option<SimulationConfig> {
        let mut restart = lock(&self.restart);
        if *restart {
            *restart = false;
            Some(*lock(&self.config))
        } else {
            None
        }
    }

    pub fn visualization(&self) -> VisualizationParams {
        *lock(&self.visualization)
    }
}

struct PropertiesApp {
    controls: SharedControls,
    simulation_thread: Option<JoinHandle<()>>,

    config: SimulationConfig,
    visualization: VisualizationParams,
    validation_error: Option<String>,
}

impl PropertiesApp {
    fn new(cc: &eframe::CreationContext<'_>, simulation_thread: Option<JoinHandle<()>>, controls: SharedControls) -> Self {
        cc.egui_ctx.set_visuals(egui::Visuals::light());

        let config = *lock(&controls.config);
        let visualization = controls.visualization();

        PropertiesApp {
            controls,
            simulation_thread,
            config,
            visualization,
            validation_error: None,
        }
    }

    fn config_ui(&mut self, ui: &mut Ui) {
        let config = &mut self.config;

        ui.add(egui::Slider::new(&mut config.downsample_shift, 0..=MAX_DOWNSAMPLE_SHIFT).text("downsample shift"));
        ui.add(egui::Slider::new(&mut config.pressure_iterations, 0..=MAX_PRESSURE_ITERATIONS).text("pressure iterations"));

        ui.separator();

        ui.add(egui::Slider::new(&mut config.density_dissipation, 0.0..=1.0).text("density dissipation"));
        ui.add(egui::Slider::new(&mut config.velocity_dissipation, 0.0..=1.0).text("velocity dissipation"));
        ui.add(egui::Slider::new(&mut config.pressure_dissipation, 0.0..=1.0).text("pressure dissipation"));
        add_combobox(
            ui,
            "Dissipation",
            &mut config.dissipation_mode,
            vec![
                (DissipationMode::PerStep, "per step"),
                (DissipationMode::TimeNormalized, "time normalized"),
            ],
        );

        ui.separator();

        ui.add(egui::Slider::new(&mut config.curl_strength, 0.0..=100.0).text("curl strength"));
        ui.add(
            egui::Slider::new(&mut config.splat_radius, 0.0001..=0.05)
                .logarithmic(true)
                .text("splat radius"),
        );
        ui.add(egui::Slider::new(&mut config.splat_force, 0.0..=50.0).text("splat force"));
        ui.add(egui::Slider::new(&mut config.splat_color_intensity, 0.0..=2.0).text("splat color intensity"));
        ui.add(egui::Slider::new(&mut config.color_cycle_moves, 1..=200).text("moves per color"));

        ui.add(
            egui::Slider::from_get_set(1.0..=100., |v| {
                if let Some(x) = v {
                    config.max_dt = (x / 1000.) as f32;
                }
                (config.max_dt * 1000.) as f64
            })
            .text("max timestep")
            .suffix("ms"),
        );
    }
}

fn add_combobox<V: PartialEq>(ui: &mut Ui, label: &'static str, value: &mut V, values: Vec<(V, &'static str)>) {
    let selected = values
        .iter()
        .find(|x| x.0 == *value)
        .map(|x| x.1)
        .unwrap_or("?");
    egui::ComboBox::from_label(label)
        .selected_text(selected)
        .show_ui(ui, |ui| {
            for (v, label) in values {
                ui.selectable_value(value, v, label);
            }
        });
}

impl eframe::App for PropertiesApp {
    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        self.controls.cancel();
        if let Some(thread) = self.simulation_thread.take() {
            if thread.join().is_err() {
                error!("simulation thread panicked");
            }
        }
    }

    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        egui::CentralPanel::default().show(ctx, |ui| {
            ScrollArea::vertical().auto_shrink([false; 2]).show(ui, |ui| {
                ui.heading("Simulation");
                self.config_ui(ui);

                ui.separator();

                if ui.button("Restart with these settings").clicked() {
                    match self.config.validate() {
                        Ok(()) => {
                            *lock(&self.controls.config) = self.config;
                            *lock(&self.controls.restart) = true;
                            self.validation_error = None;
                        }
                        Err(e) => self.validation_error = Some(e.to_string()),
                    }
                }
                if let Some(message) = &self.validation_error {
                    ui.colored_label(egui::Color32::RED, message.as_str());
                }

                ui.separator();
                ui.heading("Visualization");

                add_combobox(
                    ui,
                    "Field",
                    &mut self.visualization.visualized_field,
                    ALL_VISUALIZED_FIELDS.to_vec(),
                );
                ui.add(
                    egui::Slider::new(&mut self.visualization.display_scale, 0.001..=10.0)
                        .logarithmic(true)
                        .text("debug view scale"),
                );

                *lock(&self.controls.visualization) = self.visualization;

                if self.controls.is_cancelled() {
                    #[cfg(not(target_arch = "wasm32"))]
                    _frame.close();
                }
            });
        });
    }
}

pub fn properties_window_main(simulation_thread: Option<JoinHandle<()>>, controls: SharedControls) {
    let create_app: eframe::AppCreator =
        Box::new(|cc| Box::new(PropertiesApp::new(cc, simulation_thread, controls)));

    #[cfg(not(target_arch = "wasm32"))]
    {
        let mut native_options = eframe::NativeOptions::default();
        native_options.initial_window_size = Some(egui::Vec2::new(400., 600.));
        eframe::run_native("stable-smoke settings", native_options, create_app);
    }

    #[cfg(target_arch = "wasm32")]
    {
        let web_options = eframe::WebOptions::default();
        if let Err(e) = eframe::start_web("properties_window", web_options, create_app) {
            error!("failed to start properties window: {:?}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_is_consumed_once() {
        let controls = SharedControls::new(SimulationConfig::default());
        assert!(controls.take_restart().is_none());

        lock(&controls.config).curl_strength = 10.;
        *lock(&controls.restart) = true;

        let config = controls.take_restart().unwrap();
        assert_eq!(config.curl_strength, 10.);
        assert!(controls.take_restart().is_none());
    }

    #[test]
    fn cancellation_is_shared() {
        let controls = SharedControls::default();
        let clone = controls.clone();
        clone.cancel();
        assert!(controls.is_cancelled());
    }
}
