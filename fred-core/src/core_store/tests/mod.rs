/*
    Tests for the core_store subsystem

    - versioning: local writes, conditional writes, siblings
    - remote_versions: admitting versions from peers
    - pruning: superseded rows and failure handling
    - reads: scans, version-filtered reads, keygroup lifecycle
*/
