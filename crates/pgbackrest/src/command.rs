//! Commands run inside database containers.

use crate::config::{CONFIG_DIRECTORY, CONFIG_HASH_KEY, DEFAULT_STANZA};

/// Printed by [`stanza_create_command`] when the mounted configuration is
/// not the expected one yet.
pub const CONFIG_HASH_MISMATCH: &str = "ivory-operator error: pgBackRest config hash mismatch";

/// Creates the stanza, but only once the container sees the configuration
/// with `config_hash`. Otherwise it fails with [`CONFIG_HASH_MISMATCH`] on
/// stderr and the caller should try again later.
pub fn stanza_create_command(config_hash: &str) -> Vec<String> {
    let script = format!(
        r#"
declare -r hash="$1" stanza="$2" message="$3" cmd="$4"
if [[ "$(< {CONFIG_DIRECTORY}/{CONFIG_HASH_KEY})" != "${{hash}}" ]]; then
    printf >&2 "%s" "${{message}}"; exit 1;
else
    pgbackrest "${{cmd}}" --stanza="${{stanza}}"
fi
"#
    );
    [
        "bash",
        "-ceu",
        "--",
        script.as_str(),
        "-",
        config_hash,
        DEFAULT_STANZA,
        CONFIG_HASH_MISMATCH,
        "stanza-create",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

const RESTORE_SCRIPT: &str = r#"declare -r pgdata="$1" opts="$2"
install --directory --mode=0700 "${pgdata}"
rm -f "${pgdata}/postmaster.pid"
bash -xc "pgbackrest restore ${opts}"
rm -f "${pgdata}/patroni.dynamic.json"
export PGDATA="${pgdata}" PGHOST='/tmp'

until [ "${recovery=}" = 'f' ]; do
if [ -z "${recovery}" ]; then
control=$(pg_controldata)
read -r max_conn <<< "${control##*max_connections setting:}"
read -r max_lock <<< "${control##*max_locks_per_xact setting:}"
read -r max_ptxn <<< "${control##*max_prepared_xacts setting:}"
read -r max_work <<< "${control##*max_worker_processes setting:}"
echo > /tmp/pg_hba.restore.conf 'local all "ivory" peer'
cat > /tmp/ivory.restore.conf <<EOF
archive_command = 'false'
archive_mode = 'on'
hba_file = '/tmp/pg_hba.restore.conf'
max_connections = '${max_conn}'
max_locks_per_transaction = '${max_lock}'
max_prepared_transactions = '${max_ptxn}'
max_worker_processes = '${max_work}'
unix_socket_directories = '/tmp'
EOF
if [ "$(< "${pgdata}/PG_VERSION")" -ge 12 ]; then
read -r max_wals <<< "${control##*max_wal_senders setting:}"
echo >> /tmp/ivory.restore.conf "max_wal_senders = '${max_wals}'"
fi

pg_ctl start --silent --timeout=31536000 --wait --options='--config-file=/tmp/ivory.restore.conf'
fi

recovery=$(psql -Atc "SELECT CASE
  WHEN NOT pg_catalog.pg_is_in_recovery() THEN false
  WHEN NOT pg_catalog.pg_is_wal_replay_paused() THEN true
  ELSE pg_catalog.pg_wal_replay_resume()::text = ''
END recovery" && sleep 1) || true
done

pg_ctl stop --silent --wait --timeout=31536000
mv "${pgdata}" "${pgdata}_bootstrap""#;

/// Restores `pgdata` with `pgbackrest restore`, replays WAL to the end of
/// recovery with settings read from the control file, then moves the result
/// aside as `<pgdata>_bootstrap` for the HA agent to adopt.
///
/// `args` are joined into the pgBackRest option string by the caller.
pub fn restore_command(pgdata: &str, args: &[String]) -> Vec<String> {
    let mut command: Vec<String> = ["bash", "-ceu", "--", RESTORE_SCRIPT, "-", pgdata]
        .iter()
        .map(|s| s.to_string())
        .collect();
    command.extend(args.iter().cloned());
    command
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stanza_create_command() {
        let command = stanza_create_command("abc123");
        assert_eq!(&command[..3], &["bash", "-ceu", "--"]);
        assert!(command[3].contains("/etc/pgbackrest/conf.d/config-hash"));
        assert!(command[3].contains(r#""${hash}""#));
        assert_eq!(
            &command[4..],
            &["-", "abc123", "db", CONFIG_HASH_MISMATCH, "stanza-create"]
        );
    }

    #[test]
    fn test_restore_command() {
        let command = restore_command("/pgdata/pg16", &["--stanza=db --pg1-path=/pgdata/pg16".to_string()]);
        assert_eq!(command.len(), 7);
        assert_eq!(command[5], "/pgdata/pg16");
        assert_eq!(command[6], "--stanza=db --pg1-path=/pgdata/pg16");
        assert!(command[3].ends_with(r#"mv "${pgdata}" "${pgdata}_bootstrap""#));
    }
}
