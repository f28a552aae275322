use jiff::Timestamp;
use nanoid::nanoid;

use modusnap_subprocess::ExecRecord;
use modusnap_types::EnvStep;

/// Turn one subprocess record into a step entry.
pub(crate) fn record_step(command: impl Into<String>, started_at: Timestamp, record: &ExecRecord) -> EnvStep {
    EnvStep {
        id: nanoid!(),
        command: command.into(),
        started_at,
        finished_at: Timestamp::now(),
        exit_status: record.exit_status,
        ok: record.ok,
        output: record.output.clone(),
    }
}
