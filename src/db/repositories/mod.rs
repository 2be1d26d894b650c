mod pending_events;
