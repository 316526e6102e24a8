use std::io::Cursor;

/// Encode normalized samples as a mono 16-bit PCM WAV byte buffer.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> crate::Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| crate::EngineError::Inference(format!("wav writer: {e}")))?;
        for &sample in samples {
            let int_sample = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(int_sample)
                .map_err(|e| crate::EngineError::Inference(format!("wav sample: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| crate::EngineError::Inference(format!("wav finalize: {e}")))?;
    }

    Ok(cursor.into_inner())
}

/// Little-endian 16-bit PCM bytes for the streaming wire format.
pub fn pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let int_sample = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
        bytes.extend_from_slice(&int_sample.to_le_bytes());
    }
    bytes
}
