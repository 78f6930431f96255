use log::debug;

use crate::device::constants::is_heart_rate_service;
use crate::device::types::{Advertisement, HeartRateSample, SampleOrigin, SensorContact};
use crate::error::DecodeError;

const FLAG_VALUE_FORMAT_U16: u8 = 0x01;
const FLAG_ENERGY_EXPENDED: u8 = 0x08;
const FLAG_RR_INTERVALS: u8 = 0x10;

/// Outcome of inspecting one advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisementVerdict {
    pub is_hrs_candidate: bool,
    pub sample: Option<HeartRateSample>,
}

struct Reader<'a> {
    payload: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.payload.len() - self.offset
    }

    fn take(&mut self, field: &'static str, needed: usize) -> Result<&'a [u8], DecodeError> {
        let available = self.remaining();
        if available < needed {
            return Err(DecodeError::TruncatedPayload { field, needed, available });
        }
        let payload = self.payload;
        let bytes = &payload[self.offset..self.offset + needed];
        self.offset += needed;
        Ok(bytes)
    }

    fn read_u8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        Ok(self.take(field, 1)?[0])
    }

    fn read_u16_le(&mut self, field: &'static str) -> Result<u16, DecodeError> {
        let bytes = self.take(field, 2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }
}

fn sensor_contact(flags: u8) -> SensorContact {
    match (flags >> 1) & 0b11 {
        0b10 => SensorContact::NoContact,
        0b11 => SensorContact::Contact,
        _ => SensorContact::NotSupported,
    }
}

/**
 * Decodes a Heart Rate Measurement (0x2A37) value.
 *
 * Fields are consumed left to right exactly as the flags byte declares them. A declared field
 * without enough bytes left fails the whole frame with `TruncatedPayload`; an empty payload is
 * `MalformedPayload`. RR intervals take the rest of the payload, a dangling odd byte counts as
 * truncation.
 */
pub fn decode_measurement(payload: &[u8], source_address: &str, origin: SampleOrigin) -> Result<HeartRateSample, DecodeError> {
    let flags = *payload.first().ok_or(DecodeError::MalformedPayload)?;
    let mut reader = Reader { payload, offset: 1 };

    let beats_per_minute = if flags & FLAG_VALUE_FORMAT_U16 != 0 {
        reader.read_u16_le("heart rate value (uint16)")?
    } else {
        u16::from(reader.read_u8("heart rate value (uint8)")?)
    };

    let energy_expended_joules = if flags & FLAG_ENERGY_EXPENDED != 0 {
        Some(reader.read_u16_le("energy expended")?)
    } else {
        None
    };

    let rr_intervals = if flags & FLAG_RR_INTERVALS != 0 {
        let mut intervals = Vec::with_capacity(reader.remaining() / 2);
        while reader.remaining() > 0 {
            intervals.push(reader.read_u16_le("rr interval")?);
        }
        Some(intervals)
    } else {
        None
    };

    Ok(HeartRateSample {
        beats_per_minute,
        sensor_contact: sensor_contact(flags),
        energy_expended_joules,
        rr_intervals,
        source_address: source_address.to_string(),
        origin,
    })
}

/**
 * Checks an advertisement for the Heart Rate Service and, if it carries HRS service data,
 * tries to read a heart rate out of it. Decode failures are dropped: advertising payloads
 * are routinely cut short by the radio.
 */
pub fn decode_advertisement(advertisement: &Advertisement) -> AdvertisementVerdict {
    let listed = advertisement.service_ids.iter().any(is_heart_rate_service);
    let hrs_payload = advertisement.service_data
        .iter()
        .find(|(uuid, _)| is_heart_rate_service(uuid))
        .map(|(_, payload)| payload);

    let sample = hrs_payload
        .filter(|payload| payload.len() >= 2)
        .and_then(|payload| {
            match decode_measurement(payload, &advertisement.address, SampleOrigin::Advertisement) {
                Ok(sample) => Some(sample),
                Err(err) => {
                    debug!("Ignoring heart rate service data from {}: {}", advertisement.address, err);
                    None
                },
            }
        });

    AdvertisementVerdict {
        is_hrs_candidate: listed || hrs_payload.is_some(),
        sample,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use crate::device::constants::{uuid_from_alias, HEART_RATE_SERVICE_UUID};

    const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

    fn decode(payload: &[u8]) -> Result<HeartRateSample, DecodeError> {
        decode_measurement(payload, ADDRESS, SampleOrigin::Notification)
    }

    #[test]
    fn uint8_value_uses_exactly_two_bytes() {
        for bpm in [0u8, 1, 72, 255] {
            let sample = decode(&[0x00, bpm]).unwrap();
            assert_eq!(sample.beats_per_minute, u16::from(bpm));
            assert_eq!(sample.sensor_contact, SensorContact::NotSupported);
            assert_eq!(sample.energy_expended_joules, None);
            assert_eq!(sample.rr_intervals, None);
        }
    }

    #[test]
    fn uint8_value_ignores_undeclared_trailing_bytes() {
        let sample = decode(&[0x00, 0x48, 0xFF, 0xFF]).unwrap();
        assert_eq!(sample.beats_per_minute, 72);
        assert_eq!(sample.rr_intervals, None);
    }

    #[test]
    fn uint16_value_is_little_endian() {
        let sample = decode(&[0x01, 0x4B, 0x00]).unwrap();
        assert_eq!(sample.beats_per_minute, 75);

        let sample = decode(&[0x01, 0x2C, 0x01]).unwrap();
        assert_eq!(sample.beats_per_minute, 300);
    }

    #[test]
    fn single_rr_interval() {
        let sample = decode(&[0x10, 0x3C, 0x02, 0x00]).unwrap();
        assert_eq!(sample.beats_per_minute, 60);
        assert_eq!(sample.rr_intervals, Some(vec![0x0002]));
    }

    #[test]
    fn rr_flag_without_intervals_yields_empty_list() {
        let sample = decode(&[0x10, 0x3C]).unwrap();
        assert_eq!(sample.rr_intervals, Some(vec![]));
    }

    #[test]
    fn all_fields_present() {
        // uint16 value, contact detected, energy expended, two rr intervals
        let payload = [0x1F, 0x5A, 0x00, 0x10, 0x27, 0x00, 0x04, 0x10, 0x04];
        let sample = decode(&payload).unwrap();
        assert_eq!(sample.beats_per_minute, 90);
        assert_eq!(sample.sensor_contact, SensorContact::Contact);
        assert_eq!(sample.energy_expended_joules, Some(10000));
        assert_eq!(sample.rr_intervals, Some(vec![1024, 1040]));
        assert_eq!(sample.source_address, ADDRESS);
        assert_eq!(sample.origin, SampleOrigin::Notification);
    }

    #[test]
    fn sensor_contact_bits() {
        assert_eq!(decode(&[0x00, 60]).unwrap().sensor_contact, SensorContact::NotSupported);
        assert_eq!(decode(&[0x02, 60]).unwrap().sensor_contact, SensorContact::NotSupported);
        assert_eq!(decode(&[0x04, 60]).unwrap().sensor_contact, SensorContact::NoContact);
        assert_eq!(decode(&[0x06, 60]).unwrap().sensor_contact, SensorContact::Contact);
    }

    #[test]
    fn empty_payload_is_malformed() {
        assert_eq!(decode(&[]), Err(DecodeError::MalformedPayload));
    }

    #[test]
    fn single_byte_payload_is_truncated() {
        assert!(matches!(decode(&[0x00]), Err(DecodeError::TruncatedPayload { needed: 1, available: 0, .. })));
        assert!(matches!(decode(&[0x01, 0x4B]), Err(DecodeError::TruncatedPayload { needed: 2, available: 1, .. })));
    }

    #[test]
    fn missing_energy_expended_is_truncated() {
        assert!(matches!(
            decode(&[0x08, 0x3C, 0x01]),
            Err(DecodeError::TruncatedPayload { field: "energy expended", .. })
        ));
    }

    #[test]
    fn odd_rr_tail_is_truncated() {
        assert!(matches!(
            decode(&[0x10, 0x3C, 0x02, 0x00, 0x05]),
            Err(DecodeError::TruncatedPayload { field: "rr interval", .. })
        ));
    }

    #[test]
    fn zero_bpm_is_valid() {
        assert_eq!(decode(&[0x00, 0x00]).unwrap().beats_per_minute, 0);
    }

    #[test]
    fn decoding_is_repeatable() {
        let payload = [0x16, 0x40, 0x00, 0x04];
        assert_eq!(decode(&payload), decode(&payload));
    }

    fn advertisement() -> Advertisement {
        Advertisement {
            address: ADDRESS.to_string(),
            name: Some("Band7".to_string()),
            service_ids: vec![],
            service_data: HashMap::new(),
        }
    }

    #[test]
    fn listed_service_marks_candidate() {
        let mut adv = advertisement();
        adv.service_ids.push(uuid_from_alias(0x180F));
        assert!(!decode_advertisement(&adv).is_hrs_candidate);

        adv.service_ids.push(HEART_RATE_SERVICE_UUID);
        let verdict = decode_advertisement(&adv);
        assert!(verdict.is_hrs_candidate);
        assert_eq!(verdict.sample, None);
    }

    #[test]
    fn service_data_yields_opportunistic_sample() {
        let mut adv = advertisement();
        adv.service_data.insert(HEART_RATE_SERVICE_UUID, vec![0x00, 0x51]);

        let verdict = decode_advertisement(&adv);
        assert!(verdict.is_hrs_candidate);
        let sample = verdict.sample.unwrap();
        assert_eq!(sample.beats_per_minute, 81);
        assert_eq!(sample.origin, SampleOrigin::Advertisement);
        assert_eq!(sample.source_address, ADDRESS);
    }

    #[test]
    fn short_or_truncated_service_data_is_dropped_silently() {
        let mut adv = advertisement();
        adv.service_data.insert(HEART_RATE_SERVICE_UUID, vec![0x00]);
        let verdict = decode_advertisement(&adv);
        assert!(verdict.is_hrs_candidate);
        assert_eq!(verdict.sample, None);

        adv.service_data.insert(HEART_RATE_SERVICE_UUID, vec![0x01, 0x51]);
        assert_eq!(decode_advertisement(&adv).sample, None);
    }

    #[test]
    fn foreign_service_data_is_not_decoded() {
        let mut adv = advertisement();
        adv.service_data.insert(uuid_from_alias(0x181A), vec![0x00, 0x51]);
        let verdict = decode_advertisement(&adv);
        assert!(!verdict.is_hrs_candidate);
        assert_eq!(verdict.sample, None);
    }
}
