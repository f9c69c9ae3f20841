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

//! Tolerant field extraction from loosely documented JSON payloads.
//!
//! Keys are looked up one object level at a time rather than with a JSON pointer or
//! dotted path since several upstream keys (e.g. `sdm.devices.traits.Info`) contain dots.

use serde_json::Value;

/// Return the value at `path` if every intermediate key exists and refers to an object.
pub fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, key| current.get(*key))
}

/// Return the string at `path`, or `None` if it is missing or not a string.
pub fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    lookup(value, path).and_then(Value::as_str)
}

/// Return the string at `path` as an owned `String`, defaulting to an empty string.
pub fn string_or_empty(value: &Value, path: &[&str]) -> String {
    str_at(value, path).unwrap_or_default().to_owned()
}

/// Return the number at `path` as a float, or `None` if it is missing or not a number.
pub fn f64_at(value: &Value, path: &[&str]) -> Option<f64> {
    lookup(value, path).and_then(Value::as_f64)
}

/// Return the number at `path` as an integer, or `None` if it is missing or not an integer.
///
/// Floats with no fractional part are accepted since some upstream APIs are not
/// consistent about how they encode whole numbers.
pub fn i64_at(value: &Value, path: &[&str]) -> Option<i64> {
    let v = lookup(value, path)?;
    v.as_i64().or_else(|| {
        v.as_f64()
            .filter(|f| f.fract() == 0.0 && f.is_finite())
            .map(|f| f as i64)
    })
}

/// Return the array at `path`, or an empty slice if it is missing or not an array.
pub fn array_at<'a>(value: &'a Value, path: &[&str]) -> &'a [Value] {
    lookup(value, path)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}
