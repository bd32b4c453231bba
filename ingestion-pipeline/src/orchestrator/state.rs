use state_machines::state_machine;

state_machine! {
    name: IngestionMachine,
    state: IngestionState,
    initial: Ready,
    states: [Ready, Chunked, Processed, Merged, Persisted, Failed],
    events {
        chunk { transition: { from: Ready, to: Chunked } }
        process { transition: { from: Chunked, to: Processed } }
        merge { transition: { from: Processed, to: Merged } }
        persist { transition: { from: Merged, to: Persisted } }
        abort {
            transition: { from: Ready, to: Failed }
            transition: { from: Chunked, to: Failed }
            transition: { from: Processed, to: Failed }
            transition: { from: Merged, to: Failed }
            transition: { from: Persisted, to: Failed }
        }
    }
}

pub fn ready() -> IngestionMachine<(), Ready> {
    IngestionMachine::new(())
}
