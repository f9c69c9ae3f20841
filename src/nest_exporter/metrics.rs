// nest_exporter - Prometheus metrics exporter for Nest devices
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::nest::Thermostat;
use crate::nestapp::Readings;
use crate::weather::WeatherSnapshot;
use prometheus_client::encoding::{EncodeLabelSet, EncodeMetric, MetricEncoder};
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::MetricType;
use prometheus_client::registry::Registry;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

type FloatGauge = Gauge<f64, AtomicU64>;

/// Unlabelled gauge that emits no sample at all until it has been set.
///
/// It is still described (`# HELP`, `# TYPE`) while unset, like an empty `Family`.
#[derive(Debug, Clone, Default)]
pub struct OptionalGauge {
    gauge: FloatGauge,
    present: Arc<AtomicBool>,
}

impl OptionalGauge {
    pub fn set(&self, v: f64) {
        self.gauge.set(v);
        self.present.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.present.store(false, Ordering::Release);
    }

    pub fn get(&self) -> Option<f64> {
        if self.present.load(Ordering::Acquire) {
            Some(self.gauge.get())
        } else {
            None
        }
    }
}

impl EncodeMetric for OptionalGauge {
    fn encode(&self, encoder: MetricEncoder<'_, '_>) -> Result<(), fmt::Error> {
        if self.present.load(Ordering::Acquire) {
            self.gauge.encode(encoder)
        } else {
            Ok(())
        }
    }

    fn metric_type(&self) -> MetricType {
        MetricType::Gauge
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ThermostatLabels {
    pub id: String,
    pub room: String,
    pub label: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StructureLabels {
    pub id: String,
    pub name: String,
}

/// `serial`, `structure`, and `where` labels. A plain list of pairs is used since
/// `where` can't be used as a field name.
type SensorLabels = Vec<(String, String)>;

fn sensor_labels(serial: &str, structure: &str, where_name: &str) -> SensorLabels {
    vec![
        ("serial".to_owned(), serial.to_owned()),
        ("structure".to_owned(), structure.to_owned()),
        ("where".to_owned(), where_name.to_owned()),
    ]
}

/// Replace spaces in a label value with dashes when `space_to_dash` is set.
pub fn normalize_label(label: &str, space_to_dash: bool) -> String {
    if space_to_dash {
        label.replace(' ', "-")
    } else {
        label.to_owned()
    }
}

fn b2f(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Holder for metrics that can be set from a list of thermostats.
///
/// All metrics are created and registered upon call to `ThermostatMetrics::new()` so
/// that they're always described, even before the first successful collection.
#[derive(Debug)]
pub struct ThermostatMetrics {
    up: FloatGauge,
    online: Family<ThermostatLabels, FloatGauge>,
    ambient_temperature: Family<ThermostatLabels, FloatGauge>,
    heat_setpoint: Family<ThermostatLabels, FloatGauge>,
    cool_setpoint: Family<ThermostatLabels, FloatGauge>,
    humidity: Family<ThermostatLabels, FloatGauge>,
    heating: Family<ThermostatLabels, FloatGauge>,
    cooling: Family<ThermostatLabels, FloatGauge>,
    space_to_dash: bool,
}

impl ThermostatMetrics {
    pub fn new(reg: &mut Registry, space_to_dash: bool) -> Self {
        let metrics = Self {
            up: FloatGauge::default(),
            online: Family::default(),
            ambient_temperature: Family::default(),
            heat_setpoint: Family::default(),
            cool_setpoint: Family::default(),
            humidity: Family::default(),
            heating: Family::default(),
            cooling: Family::default(),
            space_to_dash,
        };

        reg.register("nest_up", "Was talking to Nest API successful", metrics.up.clone());
        reg.register("nest_online", "Is the thermostat online", metrics.online.clone());
        reg.register(
            "nest_ambient_temperature_celsius",
            "Inside temperature",
            metrics.ambient_temperature.clone(),
        );
        reg.register(
            "nest_setpoint_temperature_celsius",
            "Heating setpoint temperature",
            metrics.heat_setpoint.clone(),
        );
        reg.register(
            "nest_cool_setpoint_temperature_celsius",
            "Cooling setpoint temperature",
            metrics.cool_setpoint.clone(),
        );
        reg.register("nest_humidity_percent", "Inside humidity", metrics.humidity.clone());
        reg.register("nest_heating", "Is thermostat heating", metrics.heating.clone());
        reg.register("nest_cooling", "Is thermostat cooling", metrics.cooling.clone());

        metrics
    }

    /// Replace all per-thermostat values. Offline thermostats only get the `online` gauge
    /// since their other readings are unknown.
    pub fn observe(&self, thermostats: &[Thermostat]) {
        self.clear();
        self.up.set(1.0);

        for t in thermostats {
            let labels = ThermostatLabels {
                id: t.id.clone(),
                room: t.room.clone(),
                label: normalize_label(&t.label, self.space_to_dash),
            };

            self.online.get_or_create(&labels).set(b2f(t.online));
            if !t.online {
                continue;
            }

            set_optional(&self.ambient_temperature, &labels, t.ambient_temperature);
            set_optional(&self.heat_setpoint, &labels, t.heat_setpoint);
            set_optional(&self.cool_setpoint, &labels, t.cool_setpoint);
            set_optional(&self.humidity, &labels, t.humidity);
            self.heating.get_or_create(&labels).set(b2f(t.hvac_status.is_heating()));
            self.cooling.get_or_create(&labels).set(b2f(t.hvac_status.is_cooling()));
        }
    }

    pub fn failed(&self) {
        self.clear();
        self.up.set(0.0);
    }

    fn clear(&self) {
        self.online.clear();
        self.ambient_temperature.clear();
        self.heat_setpoint.clear();
        self.cool_setpoint.clear();
        self.humidity.clear();
        self.heating.clear();
        self.cooling.clear();
    }
}

/// Holder for metrics that can be set from a weather snapshot.
#[derive(Debug)]
pub struct WeatherMetrics {
    up: FloatGauge,
    temperature: OptionalGauge,
    humidity: OptionalGauge,
    pressure: OptionalGauge,
}

impl WeatherMetrics {
    pub fn new(reg: &mut Registry) -> Self {
        let metrics = Self {
            up: FloatGauge::default(),
            temperature: OptionalGauge::default(),
            humidity: OptionalGauge::default(),
            pressure: OptionalGauge::default(),
        };

        reg.register(
            "nest_weather_up",
            "Was talking to OpenWeatherMap API successful",
            metrics.up.clone(),
        );
        reg.register(
            "nest_weather_temperature_celsius",
            "Outside temperature",
            metrics.temperature.clone(),
        );
        reg.register(
            "nest_weather_humidity_percent",
            "Outside humidity",
            metrics.humidity.clone(),
        );
        reg.register(
            "nest_weather_pressure_hectopascal",
            "Outside pressure",
            metrics.pressure.clone(),
        );

        metrics
    }

    pub fn observe(&self, snapshot: &WeatherSnapshot) {
        self.up.set(1.0);
        self.temperature.set(snapshot.temperature);
        self.humidity.set(snapshot.humidity);
        self.pressure.set(snapshot.pressure);
    }

    pub fn failed(&self) {
        self.up.set(0.0);
        self.temperature.clear();
        self.humidity.clear();
        self.pressure.clear();
    }
}

/// Holder for metrics that can be set from Nest app readings.
#[derive(Debug)]
pub struct NestAppMetrics {
    up: FloatGauge,
    temperature: Family<SensorLabels, FloatGauge>,
    battery: Family<SensorLabels, FloatGauge>,
    last_updated: Family<SensorLabels, FloatGauge>,
    outside_temperature: Family<StructureLabels, FloatGauge>,
}

impl NestAppMetrics {
    pub fn new(reg: &mut Registry) -> Self {
        let metrics = Self {
            up: FloatGauge::default(),
            temperature: Family::default(),
            battery: Family::default(),
            last_updated: Family::default(),
            outside_temperature: Family::default(),
        };

        reg.register("nest_app_up", "Was talking to Nest app API successful", metrics.up.clone());
        reg.register(
            "nest_temp_sensor_temperature_celsius",
            "Temperature Sensor temperature",
            metrics.temperature.clone(),
        );
        reg.register(
            "nest_temp_sensor_battery",
            "Temperature Sensor battery level (0-100)",
            metrics.battery.clone(),
        );
        reg.register(
            "nest_temp_sensor_last_updated_timestamp_seconds",
            "UNIX timestamp of the last Temperature Sensor update",
            metrics.last_updated.clone(),
        );
        reg.register(
            "nest_outside_temperature_celsius",
            "Outside temperature",
            metrics.outside_temperature.clone(),
        );

        metrics
    }

    pub fn observe(&self, readings: &Readings) {
        self.clear();
        self.up.set(1.0);

        for sensor in readings.sensors.iter() {
            let labels = sensor_labels(&sensor.serial_number, &sensor.structure_name, &sensor.where_name);
            set_optional(&self.temperature, &labels, sensor.temperature);
            set_optional(&self.battery, &labels, sensor.battery_level.map(|b| b as f64));
            set_optional(
                &self.last_updated,
                &labels,
                sensor.last_updated_at.map(|t| t.timestamp() as f64),
            );
        }

        for structure in readings.structures.iter() {
            let labels = StructureLabels {
                id: structure.id.clone(),
                name: structure.name.clone(),
            };

            set_optional(&self.outside_temperature, &labels, structure.outside_temperature);
        }
    }

    pub fn failed(&self) {
        self.clear();
        self.up.set(0.0);
    }

    fn clear(&self) {
        self.temperature.clear();
        self.battery.clear();
        self.last_updated.clear();
        self.outside_temperature.clear();
    }
}

fn set_optional<S>(family: &Family<S, FloatGauge>, labels: &S, value: Option<f64>)
where
    S: Clone + std::hash::Hash + Eq,
{
    if let Some(v) = value {
        family.get_or_create(labels).set(v);
    }
}

#[cfg(test)]
mod test {
    use super::{normalize_label, NestAppMetrics, OptionalGauge, ThermostatMetrics, WeatherMetrics};
    use crate::nest::{HvacStatus, Thermostat};
    use crate::nestapp::{Readings, Structure, TemperatureSensor};
    use crate::weather::WeatherSnapshot;
    use prometheus_client::encoding::text::encode;
    use prometheus_client::registry::Registry;
    use std::collections::HashMap;

    fn encoded(reg: &Registry) -> String {
        let mut buf = String::new();
        encode(&mut buf, reg).unwrap();
        buf
    }

    fn thermostat(id: &str, online: bool) -> Thermostat {
        Thermostat {
            id: id.to_owned(),
            label: "Living Room".to_owned(),
            room: "Downstairs".to_owned(),
            online,
            ambient_temperature: Some(20.5),
            humidity: Some(40.0),
            heat_setpoint: None,
            cool_setpoint: Some(24.0),
            hvac_status: HvacStatus::Cooling,
        }
    }

    #[test]
    fn test_normalize_label() {
        assert_eq!("Living-Room", normalize_label("Living Room", true));
        assert_eq!("Living Room", normalize_label("Living Room", false));
        assert_eq!("Hall", normalize_label("Hall", true));
    }

    #[test]
    fn test_thermostat_metrics_described_without_data() {
        let mut reg = Registry::default();
        let _metrics = ThermostatMetrics::new(&mut reg, false);
        let text = encoded(&reg);

        assert!(text.contains("# HELP nest_online "));
        assert!(text.contains("# TYPE nest_ambient_temperature_celsius gauge"));
        assert!(text.contains("# HELP nest_setpoint_temperature_celsius "));
        assert!(text.contains("# HELP nest_cooling "));
        assert!(!text.contains("nest_online{"));
    }

    #[test]
    fn test_thermostat_metrics_online() {
        let mut reg = Registry::default();
        let metrics = ThermostatMetrics::new(&mut reg, false);
        metrics.observe(&[thermostat("t1", true)]);
        let text = encoded(&reg);

        let labels = r#"{id="t1",room="Downstairs",label="Living Room"}"#;
        assert!(text.contains("nest_up 1"));
        assert!(text.contains(&format!("nest_online{} 1", labels)));
        assert!(text.contains(&format!("nest_ambient_temperature_celsius{} 20.5", labels)));
        assert!(text.contains(&format!("nest_cool_setpoint_temperature_celsius{} 24", labels)));
        assert!(text.contains(&format!("nest_cooling{} 1", labels)));
        assert!(text.contains(&format!("nest_heating{} 0", labels)));
        assert!(!text.contains("nest_setpoint_temperature_celsius{"));
    }

    #[test]
    fn test_thermostat_metrics_offline() {
        let mut reg = Registry::default();
        let metrics = ThermostatMetrics::new(&mut reg, false);
        metrics.observe(&[thermostat("t1", false)]);
        let text = encoded(&reg);

        assert!(text.contains(r#"nest_online{id="t1",room="Downstairs",label="Living Room"} 0"#));
        assert!(!text.contains("nest_ambient_temperature_celsius{"));
        assert!(!text.contains("nest_humidity_percent{"));
        assert!(!text.contains("nest_cool_setpoint_temperature_celsius{"));
        assert!(!text.contains("nest_heating{"));
        assert!(!text.contains("nest_cooling{"));
    }

    #[test]
    fn test_thermostat_metrics_space_to_dash() {
        let mut reg = Registry::default();
        let metrics = ThermostatMetrics::new(&mut reg, true);
        metrics.observe(&[thermostat("t1", true)]);
        let text = encoded(&reg);

        assert!(text.contains(r#"label="Living-Room""#));
        assert!(text.contains(r#"room="Downstairs""#));
    }

    #[test]
    fn test_thermostat_metrics_failed_clears() {
        let mut reg = Registry::default();
        let metrics = ThermostatMetrics::new(&mut reg, false);
        metrics.observe(&[thermostat("t1", true)]);
        metrics.failed();
        let text = encoded(&reg);

        assert!(text.contains("nest_up 0"));
        assert!(!text.contains("nest_online{"));
    }

    #[test]
    fn test_weather_metrics() {
        let mut reg = Registry::default();
        let metrics = WeatherMetrics::new(&mut reg);
        metrics.observe(&WeatherSnapshot {
            temperature: 17.57,
            humidity: 82.0,
            pressure: 1016.0,
        });
        let text = encoded(&reg);

        assert!(text.contains("nest_weather_up 1"));
        assert!(text.contains("nest_weather_temperature_celsius 17.57\n"));
        assert!(text.contains("nest_weather_humidity_percent 82"));
        assert!(text.contains("nest_weather_pressure_hectopascal 1016"));
        assert!(!text.contains("{}"));

        metrics.failed();
        let text = encoded(&reg);
        assert!(text.contains("nest_weather_up 0"));
        assert!(text.contains("# TYPE nest_weather_temperature_celsius gauge"));
        assert!(!text.contains("17.57"));
        assert!(!text.contains("nest_weather_pressure_hectopascal 1016"));
    }

    #[test]
    fn test_optional_gauge() {
        let gauge = OptionalGauge::default();
        assert_eq!(None, gauge.get());

        gauge.set(3.5);
        assert_eq!(Some(3.5), gauge.get());

        gauge.clear();
        assert_eq!(None, gauge.get());
    }

    #[test]
    fn test_nest_app_metrics() {
        let mut reg = Registry::default();
        let metrics = NestAppMetrics::new(&mut reg);
        metrics.observe(&Readings {
            structures: vec![
                Structure {
                    id: "S1".to_owned(),
                    name: "Home".to_owned(),
                    where_names: HashMap::new(),
                    outside_temperature: Some(11.25),
                },
                Structure {
                    id: "S2".to_owned(),
                    name: "Cabin".to_owned(),
                    where_names: HashMap::new(),
                    outside_temperature: None,
                },
            ],
            sensors: vec![
                TemperatureSensor {
                    serial_number: "22AA01".to_owned(),
                    structure_name: "Home".to_owned(),
                    where_name: "Kitchen".to_owned(),
                    last_updated_at: None,
                    temperature: Some(20.5),
                    battery_level: Some(93),
                },
                TemperatureSensor {
                    serial_number: "22AA02".to_owned(),
                    structure_name: "Home".to_owned(),
                    where_name: "Attic".to_owned(),
                    last_updated_at: None,
                    temperature: None,
                    battery_level: Some(12),
                },
            ],
        });
        let text = encoded(&reg);

        let labels = r#"{serial="22AA01",structure="Home",where="Kitchen"}"#;
        assert!(text.contains("nest_app_up 1"));
        assert!(text.contains(&format!("nest_temp_sensor_temperature_celsius{} 20.5", labels)));
        assert!(text.contains(&format!("nest_temp_sensor_battery{} 93", labels)));
        assert!(!text.contains("nest_temp_sensor_last_updated_timestamp_seconds{"));
        assert!(text.contains(r#"nest_outside_temperature_celsius{id="S1",name="Home"} 11.25"#));
        assert!(!text.contains(r#"name="Cabin""#));

        let attic = r#"{serial="22AA02",structure="Home",where="Attic"}"#;
        assert!(text.contains(&format!("nest_temp_sensor_battery{} 12", attic)));
        assert!(!text.contains(&format!("nest_temp_sensor_temperature_celsius{}", attic)));
    }
}
