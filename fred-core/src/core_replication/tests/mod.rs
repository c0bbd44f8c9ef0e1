/*
    Tests for the core_replication subsystem

    - relay: fan-out of updates and deletes to peer replicas
    - membership: node and replica bookkeeping, bootstrap sequencing
*/
