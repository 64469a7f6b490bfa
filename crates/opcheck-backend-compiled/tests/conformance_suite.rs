opcheck_conformance::define_conformance_tests!(compiled, opcheck_backend_compiled::CompiledBackend::new);
