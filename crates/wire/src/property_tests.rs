// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Property tests: framing must be chunking-invariant and envelopes must
//! roundtrip regardless of payload content.

use proptest::prelude::*;

use crate::envelope::{Destination, Envelope};
use crate::frame::{encode_frame, FrameDecoder, DEFAULT_MAX_FRAME_LEN};
use crate::message::{Heartbeat, JobFailureLogs, Payload};
use dredge_core::JobId;

fn arb_payload() -> impl Strategy<Value = Payload> {
    prop_oneof![
        (any::<u64>(), proptest::option::of(any::<u32>())).prop_map(|(ts, jobs)| {
            Payload::Heartbeat(Heartbeat { timestamp: ts, active_jobs: jobs, system_status: None })
        }),
        proptest::collection::vec("[ -~]{0,40}", 0..5).prop_map(|lines| {
            Payload::JobFailureLogs(JobFailureLogs { job_id: JobId::new("job-prop"), lines })
        }),
        Just(Payload::GetStatus),
        Just(Payload::Shutdown),
    ]
}

proptest! {
    #[test]
    fn frames_survive_arbitrary_chunking(
        payloads in proptest::collection::vec(arb_payload(), 1..8),
        chunk_len in 1usize..32,
    ) {
        let envelopes: Vec<Envelope> = payloads
            .into_iter()
            .enumerate()
            .map(|(i, p)| Envelope::new(format!("origin-{i}"), Destination::backend(), p, i as u64))
            .collect();

        let mut stream = Vec::new();
        for env in &envelopes {
            stream.extend(encode_frame(env).unwrap());
        }

        let mut dec = FrameDecoder::new(DEFAULT_MAX_FRAME_LEN);
        let mut decoded = Vec::new();
        for chunk in stream.chunks(chunk_len) {
            dec.push(chunk);
            while let Some(frame) = dec.next_frame() {
                decoded.push(Envelope::from_value(frame.unwrap()).unwrap());
            }
        }

        prop_assert_eq!(decoded, envelopes);
    }

    #[test]
    fn garbage_never_panics_the_decoder(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        let mut dec = FrameDecoder::new(1024);
        dec.push(&bytes);
        // Drain everything; errors are fine, panics are not.
        while dec.next_frame().is_some() {}
    }
}
